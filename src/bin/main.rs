use conf::Conf;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use postguard::{hold::PostsuperHold, Service, ServiceConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Conf, Debug)]
struct Config {
    /// If true, just validate config and don't start
    #[conf(long)]
    dry_run: bool,
    /// Socket to listen for administrative HTTP requests
    #[conf(long, env, default_value = "0.0.0.0:1704")]
    admin_listen_addr: SocketAddr,
    #[conf(flatten)]
    service: ServiceConfig,
}

fn init_logging() {
    // Build a default tracing subscriber, writing to STDERR
    // Uses RUST_LOG env var for filtering, defaults to "info" if not set
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // load dotenv file
    match dotenvy::dotenv() {
        Ok(path) => info!("Read dotenv file from: {}", path.display()),
        Err(dotenvy::Error::Io(io_error)) => {
            if matches!(io_error.kind(), std::io::ErrorKind::NotFound) {
                info!("Couldn't find a dotenv file");
            } else {
                panic!("Io error when reading dot env file: {io_error}")
            }
        }
        Err(err) => {
            panic!("Error reading dotenv file: {err}")
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = Config::parse();

    info!("Config = {config:#?}");

    if config.dry_run {
        return;
    }

    let token = CancellationToken::new();

    let hold = Arc::new(PostsuperHold::new(&config.service.hold_command));
    let service = Arc::new(Service::new(config.service, hold, token.clone()));

    // Pre-populate from the last snapshot before anything can call in.
    service.load_state();

    let listener = TcpListener::bind(config.admin_listen_addr).await.unwrap();
    info!("Listening for admin http on {}", config.admin_listen_addr);

    // Listen for ctrl-c
    let thread_token = token.clone();
    tokio::task::spawn(async move {
        tokio::signal::ctrl_c().await.unwrap();
        warn!("ctrl-c: Stop requested");
        thread_token.cancel();
    });

    let _http_task = start_http_task(listener, service.clone());

    // Run the reaper and block on it returning. It exits when the token is
    // canceled.
    service.run().await;

    // Graceful shutdown: persist state so blocks survive the restart.
    if let Err(err) = service.save_state().await {
        error!("Could not save state on shutdown: {err}");
    }
}

fn start_http_task(listener: TcpListener, service: Arc<Service>) -> tokio::task::JoinHandle<()> {
    // Loop waiting for incoming admin connections, and pass them to the service
    tokio::task::spawn(async move {
        loop {
            let Ok((stream, remote_addr)) = listener
                .accept()
                .await
                .inspect_err(|err| error!("Error accepting connection: {err}"))
            else {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            };
            info!("New connection from: {}", remote_addr);

            // Spawn a new task to handle each connection
            let thread_service = service.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                // Serve the connection using auto protocol detection (HTTP/1 or HTTP/2)
                if let Err(err) = auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                    .serve_connection(
                        io,
                        service_fn(|req| {
                            let thread_service = thread_service.clone();
                            async move { thread_service.handle_http_request(req).await }
                        }),
                    )
                    .await
                {
                    error!("Error serving connection: {err}");
                }
            });
        }
    })
}
