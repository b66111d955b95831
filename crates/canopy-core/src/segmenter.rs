//! Segmenter invocation.
//!
//! The segmenter is an external program called as
//! `exe [args...] input output radius vres min_points`. It must exit 0 and leave a
//! `cluster_id x y z` table at `output`.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ParamTriple;
use crate::error::SegmentationError;

/// Anything that turns a point cloud into a segmentation table on disk.
pub trait Segmenter: Send + Sync {
    fn segment(&self, input: &Path, output: &Path, params: &ParamTriple) -> Result<(), SegmentationError>;
}

/// How often a running child is polled when a timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lines of segmenter stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs an external executable per unit.
#[derive(Debug, Clone)]
pub struct ExternalSegmenter {
    exe: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ExternalSegmenter {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into(), args: Vec::new(), timeout: None }
    }

    /// Leading arguments, before input/output/parameters.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the process if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, input: &Path, output: &Path, params: &ParamTriple) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.args)
            .arg(input)
            .arg(output)
            .arg(params.radius.to_string())
            .arg(params.vres.to_string())
            .arg(params.min_points.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, SegmentationError> {
        let launch_err = |source| SegmentationError::Launch { exe: self.exe.clone(), source };
        let Some(limit) = self.timeout else {
            return child.wait().map_err(launch_err);
        };
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(launch_err)? {
                return Ok(status);
            }
            if start.elapsed() >= limit {
                // Already exited between the poll and the kill is fine.
                let _ = child.kill();
                let _ = child.wait();
                return Err(SegmentationError::Timeout(limit));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Segmenter for ExternalSegmenter {
    fn segment(&self, input: &Path, output: &Path, params: &ParamTriple) -> Result<(), SegmentationError> {
        let mut child = self
            .command(input, output, params)
            .spawn()
            .map_err(|source| SegmentationError::Launch { exe: self.exe.clone(), source })?;

        // Drain stderr on a side thread so a chatty child never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        // On timeout the reader is left detached: grandchildren may still hold the pipe.
        let status = self.wait(&mut child)?;
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        if !status.success() {
            return Err(SegmentationError::ExitStatus { status: status.to_string(), stderr: tail(&stderr) });
        }
        Ok(())
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cluster::SegmentationTable;

    fn shell(script: &str) -> ExternalSegmenter {
        // sh -c SCRIPT NAME input output r v m: $1 is input, $2 output, $3.. params.
        ExternalSegmenter::new("sh").with_args(["-c", script, "segmenter"])
    }

    #[test]
    fn passes_arguments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.xyz");
        let output = dir.path().join("out.xyz");
        let seg = shell(r#"echo "7 $3 $4 $5" > "$2""#);
        seg.segment(&input, &output, &ParamTriple::new(1.5, 0.25, 12)).unwrap();

        let table = SegmentationTable::read(&output, None).unwrap();
        assert_eq!(table.clusters.len(), 1);
        assert_eq!(table.clusters[0].id, 7);
        assert_eq!(table.clusters[0].points[0], [1.5, 0.25, 12.0]);
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let seg = shell("echo 'radius too small' >&2; exit 3");
        let err = seg
            .segment(&dir.path().join("a"), &dir.path().join("b"), &ParamTriple::new(1.0, 1.0, 1))
            .unwrap_err();
        match err {
            SegmentationError::ExitStatus { stderr, .. } => assert_eq!(stderr, "radius too small"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn slow_segmenter_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let seg = shell("exec sleep 5").with_timeout(Some(Duration::from_millis(150)));
        let start = Instant::now();
        let err = seg
            .segment(&dir.path().join("a"), &dir.path().join("b"), &ParamTriple::new(1.0, 1.0, 1))
            .unwrap_err();
        assert!(matches!(err, SegmentationError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_executable_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let seg = ExternalSegmenter::new(dir.path().join("no-such-segmenter"));
        let err = seg
            .segment(&dir.path().join("a"), &dir.path().join("b"), &ParamTriple::new(1.0, 1.0, 1))
            .unwrap_err();
        assert!(matches!(err, SegmentationError::Launch { .. }));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let t = tail(&text);
        assert_eq!(t.lines().count(), STDERR_TAIL_LINES);
        assert!(t.ends_with("line 29"));
    }
}
