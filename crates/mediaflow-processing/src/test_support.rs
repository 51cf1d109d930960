//! Fake ffmpeg shell script for tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub struct FakeFfmpegBuilder {
    hardware: Vec<String>,
    smoke_test_passes: bool,
    fail_encode: bool,
    delay_secs: f64,
}

impl FakeFfmpegBuilder {
    pub fn hardware(mut self, codecs: &[&str]) -> Self {
        self.hardware = codecs.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn smoke_test_passes(mut self, passes: bool) -> Self {
        self.smoke_test_passes = passes;
        self
    }

    pub fn fail_encode(mut self) -> Self {
        self.fail_encode = true;
        self
    }

    pub fn delay_secs(mut self, secs: f64) -> Self {
        self.delay_secs = secs;
        self
    }

    pub fn write(self, dir: &Path) -> FakeFfmpeg {
        let path = dir.join("ffmpeg");
        let calls = dir.join("calls.log");
        let events = dir.join("events.log");

        let hardware_lines: String = self
            .hardware
            .iter()
            .map(|codec| format!("    echo ' V....D {}           hardware H.264'\n", codec))
            .collect();
        let fail = if self.fail_encode {
            "echo 'Invalid data found when processing input' >&2\nexit 1\n"
        } else {
            ""
        };

        let script = format!(
            r#"#!/bin/sh
echo "$*" >> '{calls}'
case "$*" in
  *-encoders*)
    echo 'Encoders:'
    echo ' V....D libx264              libx264 H.264'
{hardware_lines}    exit 0
    ;;
  *lavfi*)
    exit {smoke}
    ;;
esac
echo start >> '{events}'
sleep {delay}
echo end >> '{events}'
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
exit 0
"#,
            calls = calls.display(),
            events = events.display(),
            hardware_lines = hardware_lines,
            smoke = if self.smoke_test_passes { 0 } else { 1 },
            delay = self.delay_secs,
            fail = fail,
        );

        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        FakeFfmpeg {
            path,
            calls,
            events,
        }
    }
}

pub struct FakeFfmpeg {
    path: PathBuf,
    calls: PathBuf,
    events: PathBuf,
}

impl FakeFfmpeg {
    pub fn builder() -> FakeFfmpegBuilder {
        FakeFfmpegBuilder {
            hardware: Vec::new(),
            smoke_test_passes: false,
            fail_encode: false,
            delay_secs: 0.0,
        }
    }

    pub fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    /// Argument lines of every invocation so far.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.calls)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Transcode invocations only.
    pub fn encode_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains("-hls_time"))
            .collect()
    }

    /// Highest number of encodes that overlapped.
    pub fn peak_concurrency(&self) -> usize {
        let events = std::fs::read_to_string(&self.events).unwrap_or_default();
        let (mut current, mut peak) = (0usize, 0usize);
        for event in events.lines() {
            match event {
                "start" => {
                    current += 1;
                    peak = peak.max(current);
                }
                "end" => current = current.saturating_sub(1),
                _ => {}
            }
        }
        peak
    }
}
