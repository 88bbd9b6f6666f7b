use std::fs;
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};
use xybridge_dashboard::{Dashboard, DashboardServer, InputEvent, OutputWriter, ServerConfig};

use crate::cmd::{parse_assignment, parse_duration, ServeArgs};
use crate::exit::{dashboard_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_input_event, OutputFormat};

const SUBSCRIBER_ID: &str = "xybridge-cli";

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let text = fs::read_to_string(&args.config)
        .map_err(|err| io_error(&format!("failed reading {}", args.config.display()), err))?;
    let dashboard = Dashboard::from_config_text(&text)
        .map_err(|err| dashboard_error("invalid configuration", err))?;

    for assignment in &args.set {
        apply_assignment(&dashboard, assignment)?;
    }

    for var in dashboard.layout().inputs() {
        dashboard
            .subscribe(var.index, SUBSCRIBER_ID, move |event: &InputEvent, _: &mut OutputWriter<'_>| {
                print_input_event(event, format)
            })
            .map_err(|err| dashboard_error("subscribe failed", err))?;
    }

    if args.stdin {
        spawn_stdin_reader(Arc::clone(&dashboard));
    }

    let socket_timeout = args
        .socket_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?;
    let config = ServerConfig {
        bind: SocketAddr::new(args.bind, args.port),
        ..ServerConfig::default()
    }
    .with_socket_timeout(socket_timeout);

    #[cfg(feature = "async")]
    if args.use_async {
        return run_async(dashboard, config);
    }

    let server = DashboardServer::bind(Arc::clone(&dashboard), config)
        .map_err(|err| dashboard_error("bind failed", err))?;
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        install_ctrlc_handler(move || shutdown.store(true, Ordering::SeqCst))?;
    }

    server
        .run(&shutdown)
        .map_err(|err| dashboard_error("server failed", err))?;
    dashboard.unsubscribe_all(SUBSCRIBER_ID);
    Ok(SUCCESS)
}

#[cfg(feature = "async")]
fn run_async(dashboard: Arc<Dashboard>, config: ServerConfig) -> CliResult<i32> {
    use tokio_util::sync::CancellationToken;
    use xybridge_dashboard::{bind_async, serve_async};

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        install_ctrlc_handler(move || shutdown.cancel())?;
    }

    runtime
        .block_on(async {
            let listener = bind_async(&config).await?;
            serve_async(listener, Arc::clone(&dashboard), config, shutdown).await
        })
        .map_err(|err| dashboard_error("server failed", err))?;
    dashboard.unsubscribe_all(SUBSCRIBER_ID);
    Ok(SUCCESS)
}

fn apply_assignment(dashboard: &Dashboard, assignment: &str) -> CliResult<()> {
    let (name, value) = parse_assignment(assignment)?;
    dashboard
        .write_output_by_name(name, value)
        .map_err(|err| dashboard_error(&format!("cannot set `{name}`"), err))
}

fn spawn_stdin_reader(dashboard: Arc<Dashboard>) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match apply_assignment(&dashboard, line) {
                Ok(()) => info!(update = line, "output updated"),
                Err(err) => warn!(error = %err, "ignoring stdin update"),
            }
        }
    });
}

fn install_ctrlc_handler(on_signal: impl Fn() + Send + 'static) -> CliResult<()> {
    ctrlc::set_handler(on_signal)
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
