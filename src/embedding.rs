use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};

use crate::error::{Error, Result};

/// Turns text into a fixed-dimension vector.
///
/// Implementations wrap an external embedding model. They are called at
/// ingestion time for every page and at query time for the query itself and
/// for rerank candidates that have no stored vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl<F> Embedder for F
where
    F: Fn(&str) -> Result<Vec<f32>> + Send + Sync,
{
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self(text)
    }
}

/// Embedder backed by an external program.
///
/// The program receives the text on stdin and must print a JSON array of
/// numbers on stdout. A non-zero exit status is an error.
#[derive(Debug, Clone)]
pub struct CommandEmbedder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEmbedder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Embedder for CommandEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from a separate thread so a program that starts writing
        // before it has read everything cannot deadlock against us.
        let stdin = child.stdin.take();
        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> std::io::Result<()> {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(text.as_bytes())?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| {
                Err(std::io::Error::other("stdin writer panicked"))
            });
            (output, written)
        });

        let output = output?;
        if !output.status.success() {
            return Err(Error::Collaborator(format!(
                "embedding command {} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // The program may legitimately stop reading early.
        if let Err(e) = written
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let vector: Vec<f32> = serde_json::from_slice(&output.stdout)?;
        validate_vector(&vector)?;
        Ok(vector)
    }
}

/// Reject empty vectors and non-finite components.
pub fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::Collaborator("embedding vector is empty".into()));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::Collaborator(
            "embedding vector has non-finite components".into(),
        ));
    }
    Ok(())
}
