use std::sync::Arc;

use chanlink_frame::{decode, Decoded, FrameError, RawFrame, ReceiveAssembler};
use chanlink_transport::Connector;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionMachine;
use crate::error::{ClientError, Result};
use crate::events::Events;

/// Drive one client until `cancel` fires.
///
/// Each iteration makes sure a connection is up, performs one physical read
/// and feeds it through the assembler. Errors are published on the error
/// event and the loop carries on; the next iteration reconnects if the
/// connection died.
pub(crate) async fn run<C: Connector>(
    mut machine: ConnectionMachine<C>,
    events: Arc<Events>,
    cancel: CancellationToken,
) {
    let mut assembler = ReceiveAssembler::with_config(machine.config().frame_config());
    tracing::debug!(endpoint = %machine.endpoint(), "run loop started");

    while !cancel.is_cancelled() {
        match iteration(&mut machine, &mut assembler, &events, &cancel).await {
            Ok(()) => {}
            Err(ClientError::Cancelled) => break,
            Err(err) => events.report(&err),
        }
    }

    machine.finish();
    tracing::debug!("run loop stopped");
}

async fn iteration<C: Connector>(
    machine: &mut ConnectionMachine<C>,
    assembler: &mut ReceiveAssembler,
    events: &Events,
    cancel: &CancellationToken,
) -> Result<()> {
    machine.ensure_connected(cancel).await?;

    let read = match machine.receive(assembler.scratch_mut(), cancel).await {
        Ok(read) => read,
        Err(err) => {
            assembler.reset();
            return Err(err);
        }
    };

    assembler
        .feed(read, |frame| dispatch(events, frame))?
        .transpose()?;
    Ok(())
}

fn dispatch(events: &Events, frame: RawFrame<'_>) -> std::result::Result<(), FrameError> {
    match decode(frame.kind, frame.bytes)? {
        Decoded::Json(message) => {
            tracing::trace!(channel = %message.channel, "json message received");
            events.emit_json(&message);
        }
        Decoded::Binary(binary) => {
            tracing::trace!(
                channel = binary.channel(),
                len = binary.len(),
                "binary message received"
            );
            events.emit_binary(&binary);
        }
    }
    Ok(())
}
