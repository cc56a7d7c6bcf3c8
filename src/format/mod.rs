
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use log::debug;

use crate::config::WhipConfig;
use crate::error::{Error, Result};
use crate::output::WhipOutput;
use crate::packet::Packet;
use crate::session::whip::WhipSessionFactory;

pub const WHIP_FORMAT_NAME: &str = "whip";

/// Muxer is the destination-agnostic lifecycle a media pipeline drives:
/// header once, any number of packets, trailer once. Packets and the trailer
/// may arrive from different threads.
pub trait Muxer: Send + Sync {
    fn write_header(&self, url: &str, auth_token: Option<&str>) -> Result<()>;
    fn write_packet(&self, packet: &Packet) -> Result<()>;
    fn write_trailer(&self) -> Result<()>;
}

pub type MuxerFactory = Arc<dyn Fn() -> Box<dyn Muxer> + Send + Sync>;

/// CodecId names the codecs an output format can be asked about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    Opus,
    Aac,
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CodecId::H264 => "h264",
            CodecId::H265 => "hevc",
            CodecId::Vp8 => "vp8",
            CodecId::Vp9 => "vp9",
            CodecId::Av1 => "av1",
            CodecId::Opus => "opus",
            CodecId::Aac => "aac",
        };
        write!(f, "{s}")
    }
}

/// OutputFormat describes a registered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub name: &'static str,
    pub long_name: &'static str,
    pub mime_type: &'static str,
    /// Comma separated file extensions.
    pub extensions: &'static str,
    pub audio_codec: CodecId,
    pub video_codec: CodecId,
    /// The output manages its own connection; no file is opened for it.
    pub no_file: bool,
}

impl OutputFormat {
    pub fn supports_codec(&self, codec: CodecId) -> bool {
        codec == self.audio_codec || codec == self.video_codec
    }

    pub fn matches_extension(&self, extension: &str) -> bool {
        self.extensions
            .split(',')
            .any(|ext| ext.trim().eq_ignore_ascii_case(extension))
    }
}

/// WHIP_OUTPUT_FORMAT is the WebRTC-HTTP ingest output.
pub const WHIP_OUTPUT_FORMAT: OutputFormat = OutputFormat {
    name: WHIP_FORMAT_NAME,
    long_name: "WebRTC HTTP Ingest Protocol",
    mime_type: "video/x-whip",
    extensions: "whip",
    audio_codec: CodecId::Opus,
    video_codec: CodecId::H264,
    no_file: true,
};

struct Registration {
    format: OutputFormat,
    factory: MuxerFactory,
}

lazy_static! {
    static ref OUTPUT_FORMATS: RwLock<HashMap<&'static str, Registration>> = {
        let mut formats = HashMap::new();
        let factory: MuxerFactory = Arc::new(|| {
            let output = WhipOutput::new(WhipSessionFactory::new(WhipConfig::default()));
            Box::new(output) as Box<dyn Muxer>
        });
        formats.insert(
            WHIP_FORMAT_NAME,
            Registration {
                format: WHIP_OUTPUT_FORMAT,
                factory,
            },
        );
        RwLock::new(formats)
    };
}

/// register_output_format adds a named output to the process-wide registry.
pub fn register_output_format(format: OutputFormat, factory: MuxerFactory) -> Result<()> {
    let mut formats = OUTPUT_FORMATS
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if formats.contains_key(format.name) {
        return Err(Error::ErrOutputFormatExists(format.name.to_owned()));
    }
    debug!("registering output format {}", format.name);
    formats.insert(format.name, Registration { format, factory });
    Ok(())
}

pub fn find_output_format(name: &str) -> Option<OutputFormat> {
    let formats = OUTPUT_FORMATS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    formats.get(name).map(|registration| registration.format.clone())
}

/// new_muxer instantiates a fresh muxer for the named format.
pub fn new_muxer(name: &str) -> Result<Box<dyn Muxer>> {
    let factory = {
        let formats = OUTPUT_FORMATS
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match formats.get(name) {
            Some(registration) => Arc::clone(&registration.factory),
            None => return Err(Error::ErrUnknownOutputFormat(name.to_owned())),
        }
    };
    Ok(factory())
}

/// query_codec reports whether the named format can carry `codec`.
pub fn query_codec(name: &str, codec: CodecId) -> bool {
    find_output_format(name).map_or(false, |format| format.supports_codec(codec))
}

/// guess_format picks a registered format from the extension of a
/// destination url's path.
pub fn guess_format(url: &str) -> Option<OutputFormat> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, extension) = file_name.rsplit_once('.')?;

    let formats = OUTPUT_FORMATS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut candidates: Vec<&OutputFormat> = formats
        .values()
        .map(|registration| &registration.format)
        .filter(|format| format.matches_extension(extension))
        .collect();
    candidates.sort_by_key(|format| format.name);
    candidates.first().map(|format| (*format).clone())
}
