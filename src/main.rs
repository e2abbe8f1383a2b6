use std::process;
use std::sync::Arc;

use env_logger;
use log::{
    error,
    info,
};

use davbridge::server::{
    dav_handler,
    DavServer,
};
use davbridge::storage::{
    LocalStorage,
    MemoryStorage,
    Storage,
};

mod arg;

use arg::{
    Backend,
    Settings,
};

fn main() {
    env_logger::init();

    let settings = match Settings::from_args() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        },
    };

    let storage: Arc<dyn Storage> = match settings.backend {
        Backend::Local => {
            match LocalStorage::new(&settings.root) {
                Ok(v) => {
                    info!("serving folder {}", v.root().display());
                    Arc::new(v)
                },
                Err(e) => {
                    error!("cannot serve {}: {}", settings.root.display(), e);
                    process::exit(1);
                },
            }
        },
        Backend::Memory => {
            info!("serving memory backend of {} bytes", settings.capacity);
            Arc::new(MemoryStorage::with_capacity(settings.capacity))
        },
    };

    let srv = match DavServer::bind(settings.address(), dav_handler(storage), settings.server()) {
        Ok(v) => v,
        Err(e) => {
            error!("cannot listen on {}: {}", settings.address(), e);
            process::exit(1);
        },
    };
    srv.run();
}
