//! Output plumbing: the `Writer` sink trait and the `Reporter` shim that
//! turns orchestrator/controller events into writer and logger calls.

use crate::chain::ChainState;
use crate::core::{Draw, Logger, Model, SamplerKernel};
use indicatif::ProgressBar;
use std::error::Error;

/// Row-oriented output sink for draws and diagnostics.
pub trait Writer {
    /// Column names; emitted exactly once, before any data row.
    fn write_header(&mut self, names: &[String]) -> Result<(), Box<dyn Error>>;

    fn write_row(&mut self, values: &[f64]) -> Result<(), Box<dyn Error>>;

    /// Free-form annotation (timing, adaptation results).
    fn write_comment(&mut self, text: &str) -> Result<(), Box<dyn Error>>;
}

/// Writer that discards everything.
#[derive(Debug, Default)]
pub struct NullWriter;

impl Writer for NullWriter {
    fn write_header(&mut self, _names: &[String]) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn write_row(&mut self, _values: &[f64]) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn write_comment(&mut self, _text: &str) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// Writer that keeps everything in memory; used in tests and by callers that
/// post-process draws directly.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryWriter {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<f64>>,
    pub comments: Vec<String>,
}

impl Writer for MemoryWriter {
    fn write_header(&mut self, names: &[String]) -> Result<(), Box<dyn Error>> {
        if self.header.is_some() {
            return Err("header already written".into());
        }
        self.header = Some(names.to_vec());
        Ok(())
    }

    fn write_row(&mut self, values: &[f64]) -> Result<(), Box<dyn Error>> {
        self.rows.push(values.to_vec());
        Ok(())
    }

    fn write_comment(&mut self, text: &str) -> Result<(), Box<dyn Error>> {
        self.comments.push(text.to_string());
        Ok(())
    }
}

/// Adapter between the control loops and the external writers.
///
/// Owns the sample writer, the diagnostic writer, and an optional progress
/// bar ticked once per iteration.
pub struct Reporter<SW: Writer, DW: Writer> {
    sample: SW,
    diagnostic: DW,
    progress: Option<ProgressBar>,
}

impl<SW: Writer, DW: Writer> Reporter<SW, DW> {
    pub fn new(sample: SW, diagnostic: DW) -> Self {
        Self {
            sample,
            diagnostic,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Emits the sample header: kernel columns followed by parameter names.
    pub fn write_sample_names<M: Model, K: SamplerKernel<M>>(
        &mut self,
        kernel: &K,
        model: &M,
    ) -> Result<(), Box<dyn Error>> {
        let mut names = kernel.sampler_param_names();
        names.extend(model.parameter_names());
        self.sample.write_header(&names)
    }

    /// Emits the adaptation-trajectory header, one row per window boundary.
    pub fn write_diagnostic_names(&mut self) -> Result<(), Box<dyn Error>> {
        let names = ["iter__", "stepsize__", "max_rhat__", "min_ess__"]
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        self.diagnostic.write_header(&names)
    }

    pub fn write_draw<M: Model, K: SamplerKernel<M>>(
        &mut self,
        kernel: &K,
        state: &ChainState,
        draw: &Draw,
    ) -> Result<(), Box<dyn Error>> {
        let mut row = kernel.sampler_params(state, draw);
        row.extend(draw.position.iter());
        self.sample.write_row(&row)
    }

    pub fn write_diagnostic_row(
        &mut self,
        iteration: usize,
        step_size: f64,
        max_rhat: f64,
        min_ess: f64,
    ) -> Result<(), Box<dyn Error>> {
        self.diagnostic
            .write_row(&[iteration as f64, step_size, max_rhat, min_ess])
    }

    pub fn write_adapt_finish<M: Model, K: SamplerKernel<M>>(
        &mut self,
        kernel: &K,
        state: &ChainState,
    ) -> Result<(), Box<dyn Error>> {
        self.sample.write_comment("Adaptation terminated")?;
        kernel.persist_state(state, &mut self.sample)
    }

    pub fn write_timing(&mut self, warmup_secs: f64, sampling_secs: f64) -> Result<(), Box<dyn Error>> {
        self.sample
            .write_comment(&format!(" Elapsed Time: {:.6} seconds (Warm-up)", warmup_secs))?;
        self.sample
            .write_comment(&format!("               {:.6} seconds (Sampling)", sampling_secs))?;
        self.sample.write_comment(&format!(
            "               {:.6} seconds (Total)",
            warmup_secs + sampling_secs
        ))
    }

    /// Stan-style progress line: `Iteration: k / N [ xx%]  (Warmup)`.
    pub fn log_progress(&self, logger: &mut dyn Logger, iteration: usize, total: usize, warmup: bool) {
        let percent = if total == 0 {
            100
        } else {
            (100 * iteration) / total
        };
        logger.info(&format!(
            "Iteration: {:>6} / {} [{:>3}%]  ({})",
            iteration,
            total,
            percent,
            if warmup { "Warmup" } else { "Sampling" }
        ));
    }

    /// Advances the progress bar by one iteration.
    pub fn tick(&self) {
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }
    }

    pub fn finish_progress(&self, msg: &str) {
        if let Some(pb) = &self.progress {
            pb.finish_with_message(msg.to_string());
        }
    }

    /// Gives back the underlying writers once the run is over.
    pub fn into_writers(self) -> (SW, DW) {
        (self.sample, self.diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_writer_rejects_second_header() {
        let mut w = MemoryWriter::default();
        w.write_header(&["a".into()]).unwrap();
        assert!(w.write_header(&["b".into()]).is_err());
    }

    #[test]
    fn test_timing_comment_format() {
        let mut reporter = Reporter::new(MemoryWriter::default(), NullWriter);
        reporter.write_timing(1.25, 2.5).unwrap();
        let (sample, _) = reporter.into_writers();
        assert_eq!(sample.comments.len(), 3);
        assert!(sample.comments[0].contains("1.250000 seconds (Warm-up)"));
        assert!(sample.comments[1].contains("2.500000 seconds (Sampling)"));
        assert!(sample.comments[2].contains("3.750000 seconds (Total)"));
    }

    #[test]
    fn test_progress_message_format() {
        use crate::core::MemoryLogger;
        let reporter = Reporter::new(NullWriter, NullWriter);
        let mut logger = MemoryLogger::default();
        reporter.log_progress(&mut logger, 100, 400, true);
        reporter.log_progress(&mut logger, 400, 400, false);
        assert!(logger.infos[0].contains("100 / 400"));
        assert!(logger.infos[0].contains("[ 25%]"));
        assert!(logger.infos[0].contains("(Warmup)"));
        assert!(logger.infos[1].contains("(Sampling)"));
    }
}
