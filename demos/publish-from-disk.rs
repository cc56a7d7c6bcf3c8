use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Arg, Command};
use webrtc::media::io::h264_reader::{H264Reader, NalUnitType};
use webrtc::media::io::ogg_reader::OggReader;

use whip_output::format::{self, Muxer};
use whip_output::{MediaType, Packet, WhipConfig, WhipOutput, WhipSessionFactory};

const MICROS_PER_SECOND: u64 = 1_000_000;
const OPUS_CLOCK_RATE: u64 = 48_000;
const OGG_PAGE_DURATION: Duration = Duration::from_millis(20);
const H264_READ_BUFFER: usize = 1_048_576;
const VIDEO_STREAM_INDEX: usize = 0;
const AUDIO_STREAM_INDEX: usize = 1;

fn main() -> Result<()> {
    let mut app = Command::new("publish-from-disk")
        .version("0.1.0")
        .about("Publishes an H.264 and an Ogg/Opus file to a WHIP endpoint.")
        .arg(
            Arg::new("url")
                .required(true)
                .takes_value(true)
                .help("WHIP endpoint url"),
        )
        .arg(
            Arg::new("video")
                .takes_value(true)
                .short('v')
                .long("video")
                .help("Annex-B H.264 file to publish."),
        )
        .arg(
            Arg::new("audio")
                .takes_value(true)
                .short('a')
                .long("audio")
                .help("Ogg/Opus file to publish."),
        )
        .arg(
            Arg::new("fps")
                .takes_value(true)
                .long("fps")
                .default_value("30")
                .help("Frame rate of the video file."),
        )
        .arg(
            Arg::new("token")
                .takes_value(true)
                .short('t')
                .long("token")
                .help("Bearer token for the WHIP endpoint."),
        )
        .arg(
            Arg::new("config")
                .takes_value(true)
                .short('c')
                .long("config")
                .help("JSON session configuration. Defaults to the registered whip format."),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .help("Prints debug log information"),
        );

    let matches = app.clone().get_matches();

    if matches.is_present("debug") {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log::LevelFilter::Debug)
            .init();
    }

    let url = matches
        .value_of("url")
        .ok_or_else(|| anyhow!("missing endpoint url"))?;
    let video_file = matches.value_of("video").map(str::to_owned);
    let audio_file = matches.value_of("audio").map(str::to_owned);
    if video_file.is_none() && audio_file.is_none() {
        app.print_help()?;
        return Err(anyhow!("nothing to publish, pass --video and/or --audio"));
    }
    for path in video_file.iter().chain(audio_file.iter()) {
        if !Path::new(path).exists() {
            return Err(anyhow!("file: '{path}' not exist"));
        }
    }
    let fps: u64 = matches.value_of("fps").unwrap_or("30").parse()?;
    if fps == 0 {
        return Err(anyhow!("fps must be positive"));
    }

    let muxer: Arc<dyn Muxer> = match matches.value_of("config") {
        Some(path) => {
            let config = WhipConfig::from_json(&std::fs::read_to_string(path)?)?;
            Arc::new(WhipOutput::new(WhipSessionFactory::new(config)))
        }
        None => Arc::from(format::new_muxer(format::WHIP_FORMAT_NAME)?),
    };

    muxer.write_header(url, matches.value_of("token"))?;
    println!("connected to {url}");

    let mut producers = vec![];
    if let Some(video_file) = video_file {
        let muxer = Arc::clone(&muxer);
        producers.push(thread::spawn(move || publish_video(&*muxer, &video_file, fps)));
    }
    if let Some(audio_file) = audio_file {
        let muxer = Arc::clone(&muxer);
        producers.push(thread::spawn(move || publish_audio(&*muxer, &audio_file)));
    }

    for producer in producers {
        match producer.join() {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("producer thread panicked")),
        }
    }

    muxer.write_trailer()?;
    println!("done");

    Ok(())
}

/// publish_video sends every NAL of an Annex-B stream. Parameter sets share
/// the timestamp of the picture that follows them.
fn publish_video(muxer: &dyn Muxer, path: &str, fps: u64) -> Result<()> {
    let frame_interval = MICROS_PER_SECOND / fps;
    let mut h264 = H264Reader::new(BufReader::new(File::open(path)?), H264_READ_BUFFER);

    let mut dts = 0u64;
    let mut frames = 0u64;
    while let Ok(nal) = h264.next_nal() {
        let is_picture = matches!(
            nal.unit_type,
            NalUnitType::CodedSliceIdr | NalUnitType::CodedSliceNonIdr
        );

        let mut data = Vec::with_capacity(nal.data.len() + 4);
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&nal.data);
        muxer.write_packet(&Packet::new(
            VIDEO_STREAM_INDEX,
            MediaType::Video,
            dts as i64,
            data,
        ))?;

        if is_picture {
            frames += 1;
            dts += frame_interval;
            thread::sleep(Duration::from_micros(frame_interval));
        }
    }

    println!("all video frames sent: {frames}");
    Ok(())
}

/// publish_audio sends one Ogg page per packet, timed from its granule position.
fn publish_audio(muxer: &dyn Muxer, path: &str) -> Result<()> {
    let (mut ogg, _) = OggReader::new(BufReader::new(File::open(path)?), true)?;

    let mut pages = 0u64;
    while let Ok((page_data, page_header)) = ogg.parse_next_page() {
        let dts = page_header.granule_position * MICROS_PER_SECOND / OPUS_CLOCK_RATE;
        muxer.write_packet(&Packet::new(
            AUDIO_STREAM_INDEX,
            MediaType::Audio,
            dts as i64,
            page_data.freeze(),
        ))?;

        pages += 1;
        thread::sleep(OGG_PAGE_DURATION);
    }

    println!("all audio pages sent: {pages}");
    Ok(())
}
