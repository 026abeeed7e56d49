use std::sync::Arc;

use chanlink_client::ConnectionState;
use tokio::sync::{mpsc, Notify};

use crate::cmd::{install_ctrlc_handler, start_client, ListenArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_received, OutputFormat, Received};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let client = start_client(&args.connection, args.schema.as_deref())?;

    let stop = Arc::new(Notify::new());
    install_ctrlc_handler(stop.clone())?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let json_tx = tx.clone();
    client.on_json_received(move |message| {
        let _ = json_tx.send(Received::Json(message.clone()));
    });
    client.on_binary_received(move |frame| {
        let _ = tx.send(Received::Binary(frame.to_owned()));
    });

    let mut states = client.state_changes();
    let mut printed = 0usize;
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state == ConnectionState::Connected {
                    tracing::info!(url = %args.connection.url, "listening");
                }
            }
            received = rx.recv() => {
                let Some(received) = received else {
                    break;
                };
                if let Some(channels) = &args.channels {
                    if !channels.iter().any(|channel| channel == received.channel()) {
                        continue;
                    }
                }

                print_received(&received, format);
                printed = printed.saturating_add(1);

                if let Some(count) = args.count {
                    if printed >= count {
                        break;
                    }
                }
            }
        }
    }

    client.dispose().await;
    Ok(SUCCESS)
}
