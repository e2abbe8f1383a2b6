use std::path::PathBuf;
use std::str::FromStr;

use clap::{
    App,
    Arg,
    ArgMatches,
};

use davbridge::server::{
    ServerSettings,
    INLINE_BODY_LIMIT,
};
use davbridge::storage::memory::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Backend, String> {
        match s {
            "local" => Ok(Backend::Local),
            "memory" => Ok(Backend::Memory),
            v => Err(format!("unknown backend: {}", v)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub root: PathBuf,
    pub backend: Backend,
    pub io_threads: usize,
    pub workers: usize,
    pub inline_limit: u64,
    pub capacity: u64,
}

const BIND_HOST: &str  = "0.0.0.0";
const BIND_PORT: u16 = 8000;

fn number<T: FromStr>(arg: &ArgMatches, name: &str, dst: &mut T) -> Result<(), String> {
    if let Some(v) = arg.value_of(name) {
        *dst = T::from_str(v).map_err(|_| format!("invalid value for --{}: {}", name, v))?;
    }
    Ok(())
}

impl Settings {

    pub fn new() -> Settings {
        let server = ServerSettings::default();
        Settings {
            host: BIND_HOST.to_string(),
            port: BIND_PORT,
            root: PathBuf::from("."),
            backend: Backend::Local,
            io_threads: server.io_threads,
            workers: server.workers,
            inline_limit: INLINE_BODY_LIMIT,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Event loop and worker layout for the server.
    pub fn server(&self) -> ServerSettings {
        ServerSettings {
            io_threads: self.io_threads,
            workers: self.workers,
            queue_depth: self.workers * 8,
            inline_body_limit: self.inline_limit,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) -> Result<(), String> {
        match arg.value_of("host") {
            Some(v) => {
                self.host = v.to_string();
            },
            _ => {},
        };

        match arg.value_of("root") {
            Some(v) => {
                self.root = PathBuf::from(v);
            },
            _ => {},
        };

        match arg.value_of("backend") {
            Some(v) => {
                self.backend = Backend::from_str(v)?;
            },
            _ => {},
        };

        number(arg, "port", &mut self.port)?;
        number(arg, "io-threads", &mut self.io_threads)?;
        number(arg, "workers", &mut self.workers)?;
        number(arg, "inline-limit", &mut self.inline_limit)?;
        number(arg, "capacity", &mut self.capacity)?;
        if self.io_threads == 0 || self.workers == 0 {
            return Err(String::from("thread counts must be at least 1"));
        }
        Ok(())
    }

    fn app<'a, 'b>() -> App<'a, 'b> {
        let mut o = App::new("davbridge");
        o = o.version(env!("CARGO_PKG_VERSION"));
        o = o.about("WebDAV class 1 server over a pluggable storage backend");
        o = o.arg(
            Arg::with_name("host")
                .long("host")
                .short("h")
                .value_name("Host or ip to bind server to.")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .value_name("Port to bind server to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("root")
                .long("root")
                .short("r")
                .value_name("Folder served by the local backend")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("backend")
                .long("backend")
                .value_name("Storage backend, local or memory")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("io-threads")
                .long("io-threads")
                .value_name("Number of event loop threads")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("workers")
                .long("workers")
                .value_name("Number of worker threads")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("inline-limit")
                .long("inline-limit")
                .value_name("Largest body in bytes read before dispatch")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("capacity")
                .long("capacity")
                .value_name("Capacity in bytes of the memory backend")
                .takes_value(true)
                );
        o
    }

    pub fn from_matches(arg_matches: &ArgMatches) -> Result<Settings, String> {
        let mut settings = Settings::new();
        settings.bind_from_args(arg_matches)?;
        Ok(settings)
    }

    pub fn from_args() -> Result<Settings, String> {
        let arg_matches = Settings::app().get_matches();
        Settings::from_matches(&arg_matches)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        Backend,
        Settings,
    };

    fn parse(args: &[&str]) -> Result<Settings, String> {
        let mut v = vec!["davbridge"];
        v.extend_from_slice(args);
        let m = Settings::app().get_matches_from(v);
        Settings::from_matches(&m)
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&[]).unwrap();
        assert_eq!(settings.address(), "0.0.0.0:8000");
        assert_eq!(settings.backend, Backend::Local);
        assert_eq!(settings.root, PathBuf::from("."));
        assert_eq!(settings.server().inline_body_limit, 16 * 1024);
    }

    #[test]
    fn test_flags() {
        let settings = parse(&["-h", "127.0.0.1", "-p", "8080", "--backend", "memory", "--workers", "3", "--capacity", "1000"]).unwrap();
        assert_eq!(settings.address(), "127.0.0.1:8080");
        assert_eq!(settings.backend, Backend::Memory);
        assert_eq!(settings.server().workers, 3);
        assert_eq!(settings.capacity, 1000);
    }

    #[test]
    fn test_bad_values() {
        assert!(parse(&["-p", "eighty"]).is_err());
        assert!(parse(&["--backend", "s3"]).is_err());
        assert!(parse(&["--workers", "0"]).is_err());
    }
}
