//! Hands a finished output video to the user before it is deleted.

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::session::RunReport;

pub trait Presenter {
    /// `output` exists for the duration of this call only.
    fn present(&mut self, output: &Path, report: &RunReport) -> Result<()>;
}

/// Prints the run summary and optionally copies the output somewhere durable.
pub struct CliPresenter<W: Write = io::Stdout> {
    save_to: Option<PathBuf>,
    out: W,
}

impl CliPresenter<io::Stdout> {
    pub fn new(save_to: Option<PathBuf>) -> Self {
        Self::with_writer(save_to, io::stdout())
    }
}

impl<W: Write> CliPresenter<W> {
    pub fn with_writer(save_to: Option<PathBuf>, out: W) -> Self {
        Self { save_to, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Presenter for CliPresenter<W> {
    fn present(&mut self, output: &Path, report: &RunReport) -> Result<()> {
        writeln!(
            self.out,
            "processed {} frames from {} in {:.2}s",
            report.frames,
            report.input.display(),
            report.elapsed.as_secs_f64()
        )?;
        if report.summary.is_empty() {
            writeln!(self.out, "detections: none")?;
        } else {
            writeln!(self.out, "detections: {}", report.summary)?;
        }

        match &self.save_to {
            Some(dest) => {
                if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                fs::copy(output, dest).with_context(|| {
                    format!("failed to copy {} to {}", output.display(), dest.display())
                })?;
                writeln!(self.out, "saved: {}", dest.display())?;
            }
            None => {
                log::warn!(
                    "no --save path given; {} will be discarded",
                    output.display()
                );
            }
        }
        Ok(())
    }
}
