//! Event loop wiring a [`SignalingClient`] to a [`PeeringClient`].

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{PeeringClient, PeeringEvent};
use crate::config::{ClientConfig, MediaConfig};
use crate::negotiation::PeerConnectionFactory;
use crate::signaling::{SignalingClient, SignalingError};

/// Join `channel` and run peering until `shutdown` resolves or the
/// signaling connection ends.
///
/// Server events go to the peering client; descriptions and candidates it
/// produces go back out through `signaling`. Every connection is created
/// with `media`. On shutdown the channel is
/// parted first. Either way every session is closed (one
/// [`PeeringEvent::PeerRemoved`] each) and the connection is closed before
/// returning.
///
/// # Errors
///
/// [`SignalingError::ConnectionClosed`] if the relay went away, or the error
/// from a failed join or send.
pub async fn drive<F>(
    signaling: SignalingClient,
    factory: F,
    channel: &str,
    userdata: Value,
    media: &MediaConfig,
    events: mpsc::UnboundedSender<PeeringEvent>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), SignalingError>
where
    F: PeerConnectionFactory,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut client = PeeringClient::new(factory, outbound_tx, events).with_media(media.clone());

    signaling.join(channel, userdata).await?;
    tracing::info!(peer_id = %signaling.local_id(), channel, "joined channel");

    tokio::pin!(shutdown);
    let result = loop {
        tokio::select! {
            () = &mut shutdown => {
                if let Err(e) = signaling.part(channel).await {
                    tracing::warn!(err = %e, channel, "failed to part channel");
                }
                break Ok(());
            }
            event = signaling.recv() => {
                let Some(event) = event else {
                    tracing::info!(peer_id = %signaling.local_id(), "signaling connection ended");
                    break Err(SignalingError::ConnectionClosed);
                };
                client.handle(event).await;
            }
            Some(request) = outbound_rx.recv() => {
                if let Err(e) = signaling.send(&request).await {
                    break Err(e);
                }
            }
        }
    };

    client.disconnect();
    signaling.close().await;
    result
}

/// Connect using `config` and [`drive`] its channel with its media settings.
///
/// # Errors
///
/// Connection errors from [`SignalingClient::connect`], then whatever
/// [`drive`] returns.
pub async fn drive_with_config<F>(
    config: &ClientConfig,
    factory: F,
    events: mpsc::UnboundedSender<PeeringEvent>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), SignalingError>
where
    F: PeerConnectionFactory,
{
    let signaling = SignalingClient::connect(&config.server_url, config.connect_timeout).await?;
    drive(
        signaling,
        factory,
        &config.channel,
        config.userdata.clone(),
        &config.media,
        events,
        shutdown,
    )
    .await
}
