// Audio transform - External pitch/tempo shifting process
// SoundStretch spawns a soundstretch compatible program per render

use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{RenderKey, RenderParam, TransformError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One typed render request, validated before anything is spawned
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub param: RenderParam,
}

impl TransformRequest {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, param: RenderParam) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            param,
        }
    }

    /// Request rendering `key` into `render_dir`
    pub fn for_key(key: &RenderKey, render_dir: &Path) -> Self {
        Self::new(key.source.clone(), key.output_path(render_dir), key.param)
    }

    /// Check parameter bounds and the source, create the output directory
    pub fn validate(&self) -> Result<(), TransformError> {
        self.param.validate()?;
        if !self.source.is_file() {
            return Err(TransformError::MissingSource(self.source.clone()));
        }
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Program arguments, one per element, no shell involved
    pub fn args(&self) -> Vec<OsString> {
        vec![
            self.source.clone().into_os_string(),
            self.output.clone().into_os_string(),
            OsString::from(self.param.argument()),
        ]
    }
}

/// Anything able to produce a pitch or tempo shifted copy of a file
pub trait AudioTransform: Send + Sync {
    /// Render synchronously, returning the path of the written file
    fn render(&self, request: &TransformRequest) -> Result<PathBuf, TransformError>;
}

/// soundstretch process client
#[derive(Debug, Clone)]
pub struct SoundStretch {
    program: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    output_dir: PathBuf,
}

impl SoundStretch {
    pub fn new(program: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            timeout: Duration::from_secs(60),
            output_dir: output_dir.into(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Transpose `source` by `semitones` into the output directory
    pub fn transpose(&self, source: &Path, semitones: i32) -> Result<PathBuf, TransformError> {
        let key = RenderKey::new(source, RenderParam::pitch(semitones)?);
        self.render(&TransformRequest::for_key(&key, &self.output_dir))
    }

    /// Change the tempo of `source` by `percent` into the output directory
    pub fn retempo(&self, source: &Path, percent: f64) -> Result<PathBuf, TransformError> {
        let key = RenderKey::new(source, RenderParam::tempo(percent)?);
        self.render(&TransformRequest::for_key(&key, &self.output_dir))
    }

    fn wait_with_timeout(
        &self,
        child: &mut std::process::Child,
    ) -> Result<std::process::ExitStatus, TransformError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransformError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl AudioTransform for SoundStretch {
    fn render(&self, request: &TransformRequest) -> Result<PathBuf, TransformError> {
        request.validate()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        log::debug!(
            "Running {} {:?}",
            self.program.display(),
            request.args()
        );

        let mut child = cmd.spawn().map_err(|source| TransformError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // stderr is drained on its own thread while the child runs
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        // On timeout the reader is left detached, grandchildren may still hold the pipe
        let status = self.wait_with_timeout(&mut child)?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(TransformError::Failed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        match fs::metadata(&request.output) {
            Ok(meta) if meta.len() > 0 => Ok(request.output.clone()),
            _ => Err(TransformError::MissingOutput(request.output.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_args() {
        let request = TransformRequest::new("in.wav", "out.wav", RenderParam::Pitch(5));
        let args = request.args();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], OsString::from("in.wav"));
        assert_eq!(args[1], OsString::from("out.wav"));
        assert_eq!(args[2], OsString::from("-pitch=5"));
    }

    #[test]
    fn test_validate_missing_source() {
        let dir = TempDir::new().unwrap();
        let request = TransformRequest::new(
            dir.path().join("missing.wav"),
            dir.path().join("out.wav"),
            RenderParam::Pitch(1),
        );
        assert!(matches!(
            request.validate(),
            Err(TransformError::MissingSource(_))
        ));
    }

    #[test]
    fn test_validate_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.wav");
        fs::write(&source, b"RIFF").unwrap();
        let output = dir.path().join("nested/renders/out.wav");

        let request = TransformRequest::new(&source, &output, RenderParam::Tempo(2500));
        request.validate().unwrap();
        assert!(output.parent().unwrap().is_dir());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let request = TransformRequest::new("in.wav", "out.wav", RenderParam::Pitch(99));
        assert!(matches!(
            request.validate(),
            Err(TransformError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.wav");
        fs::write(&source, b"RIFF").unwrap();

        let client = SoundStretch::new(dir.path().join("no-such-program"), dir.path());
        let err = client.transpose(&source, 3).unwrap_err();
        assert!(matches!(err, TransformError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-stretch.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_render() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.wav");
        fs::write(&source, b"RIFF data").unwrap();
        let program = script(dir.path(), "cp \"$1\" \"$2\"");

        let client = SoundStretch::new(program, dir.path().join("renders"));
        let output = client.transpose(&source, -4).unwrap();
        assert!(output.to_string_lossy().ends_with("_p-4.wav"));
        assert_eq!(fs::read(&output).unwrap(), b"RIFF data");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.wav");
        fs::write(&source, b"RIFF").unwrap();
        let program = script(dir.path(), "echo 'bad wave header' >&2\nexit 3");

        let client = SoundStretch::new(program, dir.path());
        match client.retempo(&source, 10.0) {
            Err(TransformError::Failed { stderr, .. }) => {
                assert_eq!(stderr, "bad wave header");
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_output_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.wav");
        fs::write(&source, b"RIFF").unwrap();
        let program = script(dir.path(), ": > \"$2\"");

        let client = SoundStretch::new(program, dir.path());
        assert!(matches!(
            client.transpose(&source, 2),
            Err(TransformError::MissingOutput(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.wav");
        fs::write(&source, b"RIFF").unwrap();
        let program = script(dir.path(), "exec sleep 5");

        let client =
            SoundStretch::new(program, dir.path()).with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        assert!(matches!(
            client.transpose(&source, 1),
            Err(TransformError::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
