use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use targetrpc_rpc::{RpcChannel, RpcError};
use tracing::info;

use crate::cmd::MonitorArgs;
use crate::exit::{rpc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_log, print_packet, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let channel = args.link.connect()?;
    channel.set_log_sink(Arc::new(move |text: &str| print_log(text, format)));
    info!(port = %args.link.port, "monitoring");

    let seen = watch(&channel, args.count, &running, format)?;
    info!(events = seen, "monitor stopped");
    channel.close();
    Ok(SUCCESS)
}

/// Print events until `count` is reached or `running` clears. The channel
/// has already acknowledged each one on receipt.
fn watch(
    channel: &RpcChannel,
    count: Option<usize>,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<usize> {
    let mut seen = 0usize;
    while running.load(Ordering::SeqCst) {
        if count.is_some_and(|count| seen >= count) {
            break;
        }
        let event = match channel.get_evt(POLL) {
            Ok(event) => event,
            Err(RpcError::EventTimeout(_)) => continue,
            Err(err) => return Err(rpc_error("receive failed", err)),
        };

        print_packet(&event, format);
        seen = seen.saturating_add(1);
    }
    Ok(seen)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
