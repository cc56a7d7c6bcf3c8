
mod runtime;
pub(crate) mod signaling;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};
use portable_atomic::AtomicBool;
use url::Url;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use self::runtime::SessionRuntime;
use self::signaling::{bearer_token, parse_endpoint, WhipClient};
use super::{Session, SessionFactory};
use crate::config::WhipConfig;
use crate::error::{Error, Result};

const VIDEO_TRACK_ID: &str = "video";
const AUDIO_TRACK_ID: &str = "audio";
const RTCP_READ_BUFFER_SIZE: usize = 1500;

/// Endpoint-side resource created by a successful connect.
struct WhipResource {
    url: Url,
    auth_token: Option<String>,
}

/// WhipSession publishes one H.264 video track and one Opus audio track to a
/// WHIP endpoint. It owns a private tokio runtime so that the blocking
/// [`Session`] calls can drive the async webrtc stack, whether or not the
/// caller itself runs inside a tokio runtime.
pub struct WhipSession {
    config: WhipConfig,
    client: WhipClient,
    peer_connection: Option<Arc<RTCPeerConnection>>,
    video_track: Arc<TrackLocalStaticSample>,
    audio_track: Arc<TrackLocalStaticSample>,
    resource: Option<WhipResource>,
    connectivity_lost: Arc<AtomicBool>,
    runtime: SessionRuntime,
}

impl WhipSession {
    /// new allocates the runtime, the HTTP client and the peer connection with
    /// its two send-only tracks. No network traffic happens until connect.
    pub fn new(config: WhipConfig) -> Result<Self> {
        config.validate()?;

        let runtime = SessionRuntime::new()?;
        let client = WhipClient::new(config.request_timeout())?;

        let connectivity_lost = Arc::new(AtomicBool::new(false));
        let (peer_connection, video_track, audio_track) =
            runtime.block_on(new_peer_connection(&config, Arc::clone(&connectivity_lost)))?;

        Ok(WhipSession {
            config,
            client,
            peer_connection: Some(peer_connection),
            video_track,
            audio_track,
            resource: None,
            connectivity_lost,
            runtime,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.resource.is_some() && !self.connectivity_lost.load(Ordering::SeqCst)
    }

    /// resource_url is the endpoint-side session url, once connected.
    pub fn resource_url(&self) -> Option<&Url> {
        self.resource.as_ref().map(|resource| &resource.url)
    }
}

impl Session for WhipSession {
    fn connect(&mut self, url: &str, auth_token: Option<&str>) -> Result<()> {
        if self.resource.is_some() {
            return Err(Error::ErrSessionAlreadyConnected);
        }
        let peer_connection = match &self.peer_connection {
            Some(peer_connection) => Arc::clone(peer_connection),
            None => return Err(Error::WebRtc(webrtc::Error::ErrConnectionClosed)),
        };

        let endpoint = parse_endpoint(url)?;
        let auth_token = bearer_token(auth_token).map(str::to_owned);
        let gathering_timeout = self.config.gathering_timeout();
        let client = &self.client;

        let resource_url = self.runtime.block_on(async {
            let offer = peer_connection.create_offer(None).await?;
            let mut gather_complete = peer_connection.gathering_complete_promise().await;
            peer_connection.set_local_description(offer).await?;

            // Non-trickle: the offer goes out with whatever was gathered.
            if tokio::time::timeout(gathering_timeout, gather_complete.recv())
                .await
                .is_err()
            {
                warn!(
                    "ice gathering incomplete after {}ms, sending partial offer",
                    gathering_timeout.as_millis()
                );
            }

            let local_description = peer_connection
                .local_description()
                .await
                .ok_or(Error::ErrNoLocalDescription)?;

            let answer = client
                .offer(&endpoint, auth_token.as_deref(), local_description.sdp)
                .await?;
            debug!(
                "whip resource {} (etag {:?})",
                answer.resource_url, answer.etag
            );

            peer_connection
                .set_remote_description(RTCSessionDescription::answer(answer.sdp)?)
                .await?;

            Ok::<_, Error>(answer.resource_url)
        })?;

        info!("whip session established at {resource_url}");
        self.resource = Some(WhipResource {
            url: resource_url,
            auth_token,
        });

        Ok(())
    }

    fn write(&mut self, payload: Bytes, duration: i64, is_audio: bool) -> bool {
        if self.resource.is_none() {
            warn!("whip session written before connect");
            return false;
        }
        if self.connectivity_lost.load(Ordering::SeqCst) {
            return false;
        }

        let track = if is_audio {
            &self.audio_track
        } else {
            &self.video_track
        };
        let sample = Sample {
            data: payload,
            duration: self.config.time_base(is_audio).to_duration(duration),
            ..Default::default()
        };

        match self.runtime.block_on(track.write_sample(&sample)) {
            Ok(()) => true,
            Err(err) => {
                error!("failed to write {} sample: {err}", track.id());
                false
            }
        }
    }

    fn close(&mut self) {
        let resource = self.resource.take();
        let peer_connection = self.peer_connection.take();
        let client = &self.client;

        self.runtime.block_on(async {
            if let Some(resource) = resource {
                match client
                    .delete(&resource.url, resource.auth_token.as_deref())
                    .await
                {
                    Ok(()) => info!("whip session {} terminated", resource.url),
                    Err(err) => warn!("failed to delete whip session {}: {err}", resource.url),
                }
            }
            if let Some(peer_connection) = peer_connection {
                if let Err(err) = peer_connection.close().await {
                    warn!("failed to close peer connection: {err}");
                }
            }
        });
    }
}

impl Drop for WhipSession {
    fn drop(&mut self) {
        if let Some(peer_connection) = self.peer_connection.take() {
            if let Err(err) = self.runtime.block_on(peer_connection.close()) {
                warn!("failed to close peer connection on drop: {err}");
            }
        }
    }
}

async fn new_peer_connection(
    config: &WhipConfig,
    connectivity_lost: Arc<AtomicBool>,
) -> Result<(
    Arc<RTCPeerConnection>,
    Arc<TrackLocalStaticSample>,
    Arc<TrackLocalStaticSample>,
)> {
    let mut m = MediaEngine::default();
    m.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut m)?;

    let api = APIBuilder::new()
        .with_media_engine(m)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers = if config.ice_servers.is_empty() {
        vec![]
    } else {
        vec![RTCIceServer {
            urls: config.ice_servers.clone(),
            ..Default::default()
        }]
    };
    let peer_connection = Arc::new(
        api.new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await?,
    );

    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            debug!("peer connection state changed: {state}");
            if state == RTCPeerConnectionState::Failed || state == RTCPeerConnectionState::Closed
            {
                connectivity_lost.store(true, Ordering::SeqCst);
            }
            Box::pin(async {})
        },
    ));

    let video_track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            ..Default::default()
        },
        VIDEO_TRACK_ID.to_owned(),
        config.stream_id.clone(),
    ));
    add_send_only_track(&peer_connection, Arc::clone(&video_track)).await?;

    let audio_track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        AUDIO_TRACK_ID.to_owned(),
        config.stream_id.clone(),
    ));
    add_send_only_track(&peer_connection, Arc::clone(&audio_track)).await?;

    Ok((peer_connection, video_track, audio_track))
}

async fn add_send_only_track(
    peer_connection: &RTCPeerConnection,
    track: Arc<TrackLocalStaticSample>,
) -> Result<()> {
    let transceiver = peer_connection
        .add_transceiver_from_track(
            track as Arc<dyn TrackLocal + Send + Sync>,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendonly,
                send_encodings: vec![],
            }),
        )
        .await?;

    // Incoming RTCP must be drained for the interceptors (NACK, reports) to run.
    let rtp_sender = transceiver.sender().await;
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; RTCP_READ_BUFFER_SIZE];
        while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
    });

    Ok(())
}

/// WhipSessionFactory builds a [`WhipSession`] per output.
#[derive(Debug, Clone, Default)]
pub struct WhipSessionFactory {
    config: WhipConfig,
}

impl WhipSessionFactory {
    pub fn new(config: WhipConfig) -> Self {
        WhipSessionFactory { config }
    }

    pub fn config(&self) -> &WhipConfig {
        &self.config
    }
}

impl SessionFactory for WhipSessionFactory {
    fn new_session(&self) -> Option<Box<dyn Session>> {
        match WhipSession::new(self.config.clone()) {
            Ok(session) => Some(Box::new(session)),
            Err(err) => {
                error!("failed to create whip session: {err}");
                None
            }
        }
    }
}
