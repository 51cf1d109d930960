//! Stand-in ffmpeg: answers the encoder listing with libx264 only and writes a
//! playlist plus two segments for every encode.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub struct FakeFfmpeg {
    pub path: PathBuf,
    calls: PathBuf,
}

impl FakeFfmpeg {
    pub fn write(dir: &Path, delay_secs: f64, fail_encode: bool) -> Self {
        let path = dir.join("ffmpeg");
        let calls = dir.join("ffmpeg-calls.log");
        let fail = if fail_encode {
            "echo 'moov atom not found' >&2\nexit 1\n"
        } else {
            ""
        };

        let script = format!(
            r#"#!/bin/sh
echo "$*" >> '{calls}'
case "$*" in
  *-encoders*)
    echo ' V....D libx264              libx264 H.264'
    exit 0
    ;;
  *lavfi*)
    exit 1
    ;;
esac
sleep {delay}
{fail}prev=''
pattern=''
for arg in "$@"; do
  if [ "$prev" = "-hls_segment_filename" ]; then pattern="$arg"; fi
  prev="$arg"
done
printf '#EXTM3U\n#EXT-X-ENDLIST\n' > "$prev"
for n in 000 001; do
  printf 'segment' > "$(printf '%s' "$pattern" | sed "s/%03d/$n/")"
done
"#,
            calls = calls.display(),
            delay = delay_secs,
            fail = fail,
        );

        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { path, calls }
    }

    /// Number of transcode invocations so far.
    pub fn encode_count(&self) -> usize {
        std::fs::read_to_string(&self.calls)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.contains("-hls_time"))
            .count()
    }
}
