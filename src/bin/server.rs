//! nine-s-server - expose a mounted namespace over the wire protocol.
//!
//! USAGE:
//!     nine-s-server [--port <port>] [--root <dir>] [--memory]
//!
//! By default the server opens a [`Store`] rooted at `--root` (or
//! `$NINE_S_ROOT`, or `~/.nine_s/<app>`) and mounts it at `/`. Pass
//! `--memory` to serve a bare in-memory namespace instead (useful for
//! smoke-testing the wire protocol without touching disk).

use nine_s::{wire, Kernel, MemoryNamespace, Namespace};
use std::env;
use std::sync::Arc;
use tracing::info;

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = env::var("NINE_S_LOG_JSON")
        .map(|v| v == "1")
        .unwrap_or(false);

    if use_json {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .pretty()
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[derive(Default)]
struct Opts {
    port: Option<u16>,
    root: Option<String>,
    app: Option<String>,
    memory: bool,
    help: bool,
}

impl Opts {
    fn parse(args: &[String]) -> Self {
        let mut opts = Opts::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--help" | "-h" => opts.help = true,
                "--memory" => opts.memory = true,
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        opts.port = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                "--root" | "-d" => {
                    if i + 1 < args.len() {
                        opts.root = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--app" | "-a" => {
                    if i + 1 < args.len() {
                        opts.app = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        if opts.port.is_none() {
            opts.port = env::var("NINE_S_PORT").ok().and_then(|s| s.parse().ok());
        }
        if opts.root.is_none() {
            opts.root = env::var("NINE_S_ROOT").ok().filter(|s| !s.is_empty());
        }
        if opts.app.is_none() {
            opts.app = env::var("NINE_S_APP").ok().filter(|s| !s.is_empty());
        }

        opts
    }
}

fn print_usage() {
    println!(
        r#"nine-s-server - serve a Namespace over the wire protocol

USAGE:
    nine-s-server [OPTIONS]

OPTIONS:
    --port, -p <port>   TCP port to listen on (default: {}, env: NINE_S_PORT)
    --root, -d <dir>    Store root directory (env: NINE_S_ROOT)
    --app, -a <name>    App key under the store root (env: NINE_S_APP)
    --memory            Serve a bare in-memory namespace instead of a Store
    --help, -h          Print this message
"#,
        wire::DEFAULT_PORT
    );
}

fn main() -> std::io::Result<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = Opts::parse(&args[1..]);

    if opts.help {
        print_usage();
        return Ok(());
    }

    let port = opts.port.unwrap_or(wire::DEFAULT_PORT);
    let namespace: Arc<dyn Namespace> = if opts.memory {
        info!("mounting an in-memory namespace (no persistence)");
        Arc::new(MemoryNamespace::new())
    } else {
        let app = opts.app.as_deref().unwrap_or("nine-s-server");
        let store = match &opts.root {
            Some(root) => {
                let path = std::path::PathBuf::from(root).join(app);
                nine_s::Store::with_config(&path, Default::default())
            }
            None => nine_s::Store::with_config(
                dirs::home_dir()
                    .unwrap_or_else(|| std::path::PathBuf::from("."))
                    .join(".nine_s")
                    .join(app),
                Default::default(),
            ),
        }
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        info!(%app, "mounting a Store (unencrypted by default)");
        Arc::new(store)
    };

    let kernel = Kernel::new();
    kernel.mount("/", namespace);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let addr = format!("0.0.0.0:{}", port);
        let kernel: Arc<dyn Namespace> = Arc::new(kernel);

        tokio::select! {
            result = wire::listen(addr.as_str(), kernel) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                Ok(())
            }
        }
    })
}
