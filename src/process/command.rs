//! Transcoder argument template
//!
//! Builds the command line handed to the external transcoder. The output
//! layout is fixed: `<output_dir>/index.m3u8` plus numbered segments in the
//! same directory.

use std::path::{Path, PathBuf};

use crate::config::TranscoderConfig;

/// Manifest file name inside every stream output directory
pub const MANIFEST_NAME: &str = "index.m3u8";

/// Segment file name pattern inside every stream output directory
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

#[derive(Debug, Clone)]
pub struct TranscodeCommand {
    source_uri: String,
    output_dir: PathBuf,
    leading_args: Vec<String>,
    video_codec: String,
    preset: String,
    audio_codec: String,
    segment_duration_secs: u32,
    segment_list_size: u32,
}

impl TranscodeCommand {
    pub fn new(source_uri: &str, output_dir: &Path) -> Self {
        Self {
            source_uri: source_uri.to_string(),
            output_dir: output_dir.to_path_buf(),
            leading_args: Vec::new(),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            audio_codec: "aac".to_string(),
            segment_duration_secs: 2,
            segment_list_size: 6,
        }
    }

    /// Template parameters taken from the transcoder configuration
    pub fn from_config(source_uri: &str, output_dir: &Path, config: &TranscoderConfig) -> Self {
        Self::new(source_uri, output_dir)
            .with_leading_args(config.leading_args.clone())
            .with_video_codec(config.video_codec.clone())
            .with_preset(config.preset.clone())
            .with_segment_config(config.segment_duration_secs, config.segment_list_size)
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_video_codec(mut self, codec: String) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_preset(mut self, preset: String) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_segment_config(mut self, duration_secs: u32, list_size: u32) -> Self {
        self.segment_duration_secs = duration_secs.max(1);
        self.segment_list_size = list_size.max(1);
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_NAME)
    }

    /// RTSP defaults to UDP; ask for interleaved TCP instead
    fn is_rtsp(&self) -> bool {
        let lower = self.source_uri.to_ascii_lowercase();
        lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = self.leading_args.clone();

        args.extend(
            ["-hide_banner", "-loglevel", "warning", "-nostats"]
                .iter()
                .map(|s| s.to_string()),
        );

        if self.is_rtsp() {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }

        args.extend(vec![
            "-fflags".to_string(), "nobuffer".to_string(),
            "-i".to_string(), self.source_uri.clone(),
            "-c:v".to_string(), self.video_codec.clone(),
            "-preset".to_string(), self.preset.clone(),
            "-tune".to_string(), "zerolatency".to_string(),
            "-c:a".to_string(), self.audio_codec.clone(),
            "-f".to_string(), "hls".to_string(),
            "-hls_time".to_string(), self.segment_duration_secs.to_string(),
            "-hls_list_size".to_string(), self.segment_list_size.to_string(),
            "-hls_flags".to_string(), "delete_segments+omit_endlist".to_string(),
            "-hls_segment_filename".to_string(),
            self.output_dir.join(SEGMENT_PATTERN).to_string_lossy().to_string(),
            self.manifest_path().to_string_lossy().to_string(),
        ]);

        args
    }
}
