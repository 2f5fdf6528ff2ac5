use std::io::{Cursor, ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::models::address::Address;
use crate::services::storage_access::StorageAccess;

const TIMEOUT_POLL: Duration = Duration::from_millis(25);

/// What a recognizer is handed: a file it may open itself, or the raw bytes of
/// a document that only the storage collaborator can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// The OCR engine. Implementations may fail freely; [`TextExtractor`] absorbs errors.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &ImageSource) -> Result<String, AppError>;
}

/// Runs the `tesseract` command line tool (or anything with the same calling convention).
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    language: String,
    timeout: Option<Duration>,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, input: &std::ffi::OsStr, stdin_bytes: Option<&[u8]>) -> Result<String, AppError> {
        let mut child = Command::new(&self.program)
            .arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(if stdin_bytes.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::Ocr(format!("failed to start {}: {e}", self.program)))?;

        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(AppError::Ocr("recognizer stdout unavailable".to_string()));
        };
        let reader = std::thread::spawn(move || {
            let mut text = String::new();
            stdout.read_to_string(&mut text).map(|_| text)
        });

        // fed from its own thread so a stalled reader cannot outlive the deadline
        let writer = stdin_bytes.zip(child.stdin.take()).map(|(bytes, mut stdin)| {
            let bytes = bytes.to_vec();
            std::thread::spawn(move || match stdin.write_all(&bytes) {
                Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            })
        });

        let status = match self.wait_for_exit(&mut child) {
            Ok(status) => status,
            Err(err) => {
                // the pipe threads finish once the child is gone; they are not joined
                reap(&mut child);
                return Err(err);
            }
        };

        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| AppError::Ocr("recognizer input writer panicked".to_string()))??;
        }
        let text = reader
            .join()
            .map_err(|_| AppError::Ocr("recognizer output reader panicked".to_string()))??;
        if !status.success() {
            return Err(AppError::Ocr(format!("{} exited with {status}", self.program)));
        }
        Ok(text)
    }

    fn wait_for_exit(&self, child: &mut Child) -> Result<ExitStatus, AppError> {
        let Some(limit) = self.timeout else {
            return Ok(child.wait()?);
        };
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(AppError::Ocr(format!(
                    "recognizer timed out after {}s",
                    limit.as_secs_f32()
                )));
            }
            std::thread::sleep(TIMEOUT_POLL);
        }
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl TextRecognizer for CommandRecognizer {
    fn recognize(&self, image: &ImageSource) -> Result<String, AppError> {
        match image {
            ImageSource::Path(path) => self.run(path.as_os_str(), None),
            ImageSource::Bytes(bytes) => self.run(std::ffi::OsStr::new("stdin"), Some(bytes)),
        }
    }
}

/// Turns an image address into searchable text. Never fails: anything that
/// goes wrong is logged and reported as "no text found".
#[derive(Clone)]
pub struct TextExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    storage: Arc<dyn StorageAccess>,
}

impl TextExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, storage: Arc<dyn StorageAccess>) -> Self {
        Self {
            recognizer,
            storage,
        }
    }

    pub fn extract_text(&self, image: &Address) -> String {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_extract(image)));
        match outcome {
            Ok(Ok(text)) => {
                tracing::debug!(image = %image, chars = text.len(), "extracted text");
                text
            }
            Ok(Err(err)) => {
                tracing::warn!(image = %image, error = %err, "text extraction failed");
                String::new()
            }
            Err(_) => {
                tracing::error!(image = %image, "recognizer panicked");
                String::new()
            }
        }
    }

    fn try_extract(&self, image: &Address) -> Result<String, AppError> {
        let source = self.load(image)?;
        ensure_decodable(&source)?;
        let text = self.recognizer.recognize(&source)?;
        Ok(text.trim().to_string())
    }

    fn load(&self, image: &Address) -> Result<ImageSource, AppError> {
        match image {
            Address::Direct(path) => {
                if !path.is_file() {
                    return Err(AppError::Ocr(format!(
                        "image file does not exist: {}",
                        path.display()
                    )));
                }
                Ok(ImageSource::Path(path.clone()))
            }
            Address::Tree(handle) => Ok(ImageSource::Bytes(self.storage.read_document(handle)?)),
        }
    }
}

/// Rejects input whose header does not parse as one of the supported formats.
fn ensure_decodable(source: &ImageSource) -> Result<(), AppError> {
    let dimensions = match source {
        ImageSource::Path(path) => image::ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions(),
        ImageSource::Bytes(bytes) => image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions(),
    };
    match dimensions {
        Ok((width, height)) if width > 0 && height > 0 => Ok(()),
        Ok(_) => Err(AppError::Ocr("image has no pixels".to_string())),
        Err(err) => Err(AppError::Ocr(format!("could not decode image: {err}"))),
    }
}
