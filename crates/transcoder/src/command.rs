//! Construction of the ffmpeg invocation used for every job.
//!
//! Output is always Matroska: first video stream re-encoded to AV1 (SVT),
//! every audio stream to Opus, subtitles and attachments copied as-is.

use std::fmt;
use std::path::Path;

/// Encoder knobs, resolved from runtime settings once per job.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    pub preset: u32,
    pub crf: u32,
    pub film_grain: u32,
    pub audio_bitrate: String,
    /// `0` lets ffmpeg decide.
    pub max_threads: u32,
    /// `0` leaves the frame rate alone.
    pub max_fps: u32,
    /// Written to the container `comment` tag.
    pub marker: String,
    pub scale: Option<Resolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Compute a downscaled resolution so that neither the long side exceeds
/// `max_long` nor the short side exceeds `max_short`, keeping the aspect
/// ratio. A cap of `0` means "no limit". Returns `None` when no scaling is
/// needed. Both dimensions are rounded down to even numbers, which the
/// 4:2:0 encoders require.
pub fn target_resolution(
    width: u32,
    height: u32,
    max_long: u32,
    max_short: u32,
) -> Option<Resolution> {
    if width == 0 || height == 0 || (max_long == 0 && max_short == 0) {
        return None;
    }

    let long = u64::from(width.max(height));
    let short = u64::from(width.min(height));

    // Scale factor kept as a fraction (num / den) to avoid float drift.
    let mut factor = (1u64, 1u64);
    for (cap, side) in [(max_long, long), (max_short, short)] {
        let cap = u64::from(cap);
        if cap > 0 && cap * factor.1 < factor.0 * side {
            factor = (cap, side);
        }
    }
    if factor.0 >= factor.1 {
        return None;
    }

    let scale = |v: u32| {
        let scaled = u64::from(v) * factor.0 / factor.1;
        ((scaled as u32) & !1).max(2)
    };
    Some(Resolution {
        width: scale(width),
        height: scale(height),
    })
}

/// Arguments for ffmpeg (program name excluded).
///
/// Progress goes to stdout as `key=value` lines; `-nostats` keeps stderr
/// for real diagnostics only.
pub fn build_encode_args(input: &Path, output: &Path, opts: &EncodeOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostats",
        "-y",
        "-progress",
        "pipe:1",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(input.to_string_lossy().into_owned());

    for map in ["0:v:0", "0:a?", "0:s?", "0:t?"] {
        args.push("-map".into());
        args.push(map.into());
    }

    args.extend([
        "-c:v".into(),
        "libsvtav1".into(),
        "-preset".into(),
        opts.preset.to_string(),
        "-crf".into(),
        opts.crf.to_string(),
        "-svtav1-params".into(),
        format!("film-grain={}", opts.film_grain),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ]);

    if let Some(res) = opts.scale {
        args.push("-vf".into());
        args.push(format!("scale={}:{}", res.width, res.height));
    }
    if opts.max_fps > 0 {
        args.push("-fpsmax".into());
        args.push(opts.max_fps.to_string());
    }

    args.extend([
        "-c:a".into(),
        "libopus".into(),
        "-b:a".into(),
        opts.audio_bitrate.clone(),
        "-vbr".into(),
        "on".into(),
        "-c:s".into(),
        "copy".into(),
        "-c:t".into(),
        "copy".into(),
        "-metadata".into(),
        format!("comment={}", opts.marker),
    ]);

    if opts.max_threads > 0 {
        args.push("-threads".into());
        args.push(opts.max_threads.to_string());
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Render a command line for logs and the settings preview. Arguments with
/// whitespace or quotes are single-quoted.
pub fn render_command(program: &Path, args: &[String]) -> String {
    let mut out = quote(&program.to_string_lossy());
    for arg in args {
        out.push(' ');
        out.push_str(&quote(arg));
    }
    out
}

/// The command as it would run for placeholder paths.
pub fn command_preview(program: &Path, opts: &EncodeOptions) -> String {
    let args = build_encode_args(Path::new("/input.mkv"), Path::new("/output.mkv"), opts);
    render_command(program, &args)
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> EncodeOptions {
        EncodeOptions {
            preset: 6,
            crf: 30,
            film_grain: 0,
            audio_bitrate: "64k".into(),
            max_threads: 0,
            max_fps: 0,
            marker: "VidSlim-Processed".into(),
            scale: None,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn default_command_shape() {
        let args = build_encode_args(Path::new("/in/a.mp4"), Path::new("/tmp/out.mkv"), &opts());

        assert_eq!(value_after(&args, "-progress"), Some("pipe:1"));
        assert_eq!(value_after(&args, "-i"), Some("/in/a.mp4"));
        assert_eq!(value_after(&args, "-c:v"), Some("libsvtav1"));
        assert_eq!(value_after(&args, "-preset"), Some("6"));
        assert_eq!(value_after(&args, "-crf"), Some("30"));
        assert_eq!(value_after(&args, "-svtav1-params"), Some("film-grain=0"));
        assert_eq!(value_after(&args, "-c:a"), Some("libopus"));
        assert_eq!(value_after(&args, "-b:a"), Some("64k"));
        assert_eq!(value_after(&args, "-c:s"), Some("copy"));
        assert_eq!(value_after(&args, "-c:t"), Some("copy"));
        assert_eq!(
            value_after(&args, "-metadata"),
            Some("comment=VidSlim-Processed")
        );
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mkv"));

        let maps: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(maps, vec!["0:v:0", "0:a?", "0:s?", "0:t?"]);

        assert!(!args.contains(&"-threads".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
        assert!(!args.contains(&"-fpsmax".to_string()));
    }

    #[test]
    fn optional_flags() {
        let mut o = opts();
        o.max_threads = 4;
        o.max_fps = 30;
        o.scale = Some(Resolution {
            width: 1280,
            height: 720,
        });
        let args = build_encode_args(Path::new("in.mkv"), Path::new("out.mkv"), &o);
        assert_eq!(value_after(&args, "-threads"), Some("4"));
        assert_eq!(value_after(&args, "-fpsmax"), Some("30"));
        assert_eq!(value_after(&args, "-vf"), Some("scale=1280:720"));
    }

    #[test]
    fn resolution_capping() {
        // No caps, or already within bounds.
        assert_eq!(target_resolution(1920, 1080, 0, 0), None);
        assert_eq!(target_resolution(1280, 720, 1920, 1080), None);

        // Long side cap.
        assert_eq!(
            target_resolution(3840, 2160, 1920, 0),
            Some(Resolution {
                width: 1920,
                height: 1080
            })
        );
        // Short side cap applies to portrait video too.
        assert_eq!(
            target_resolution(1080, 1920, 0, 720),
            Some(Resolution {
                width: 720,
                height: 1280
            })
        );
        // The tighter cap wins.
        assert_eq!(
            target_resolution(3840, 2160, 1920, 720),
            Some(Resolution {
                width: 1280,
                height: 720
            })
        );
        // Odd results are rounded down to even.
        let r = target_resolution(1000, 750, 333, 0).unwrap();
        assert_eq!(r.width % 2, 0);
        assert_eq!(r.height % 2, 0);
        assert!(r.width <= 333);

        assert_eq!(target_resolution(0, 0, 1920, 1080), None);
    }

    #[test]
    fn preview_quotes_arguments_with_spaces() {
        let args = vec!["-i".to_string(), "/media/My Movie.mkv".to_string()];
        assert_eq!(
            render_command(Path::new("ffmpeg"), &args),
            "ffmpeg -i '/media/My Movie.mkv'"
        );

        let preview = command_preview(Path::new("ffmpeg"), &opts());
        assert!(preview.starts_with("ffmpeg "));
        assert!(preview.contains("-i /input.mkv"));
        assert!(preview.ends_with("/output.mkv"));
    }
}
