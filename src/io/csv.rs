/*!
CSV-backed writer for sample and diagnostic rows. Enable via the `csv`
feature.

Comments (timing, adapted tunables) are written as single-field records
prefixed with `# `, so the file stays one rectangular table for readers that
skip comment lines.
*/

use crate::report::Writer;
use csv::Writer as CsvInner;
use std::error::Error;
use std::fs::File;
use std::path::Path;

pub struct CsvWriter {
    inner: CsvInner<File>,
    header_written: bool,
}

impl CsvWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let inner = CsvInner::from_writer(File::create(path)?);
        Ok(Self {
            inner,
            header_written: false,
        })
    }

    pub fn flush(&mut self) -> Result<(), Box<dyn Error>> {
        self.inner.flush()?;
        Ok(())
    }
}

impl Writer for CsvWriter {
    fn write_header(&mut self, names: &[String]) -> Result<(), Box<dyn Error>> {
        if self.header_written {
            return Err("header already written".into());
        }
        self.inner.write_record(names)?;
        self.header_written = true;
        Ok(())
    }

    fn write_row(&mut self, values: &[f64]) -> Result<(), Box<dyn Error>> {
        let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.inner.write_record(&row)?;
        Ok(())
    }

    fn write_comment(&mut self, text: &str) -> Result<(), Box<dyn Error>> {
        self.inner.write_record([format!("# {}", text)])?;
        Ok(())
    }
}

impl Drop for CsvWriter {
    fn drop(&mut self) {
        let _ = self.inner.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_header_and_rows() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        let path = file.path().to_path_buf();
        {
            let mut w = CsvWriter::create(&path).unwrap();
            w.write_header(&["lp__".into(), "theta_0".into()]).unwrap();
            w.write_row(&[-1.5, 0.25]).unwrap();
            w.write_row(&[-2.0, 0.5]).unwrap();
            w.flush().unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        let expected = "lp__,theta_0\n-1.5,0.25\n-2,0.5";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn test_comments_are_prefixed() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        let path = file.path().to_path_buf();
        {
            let mut w = CsvWriter::create(&path).unwrap();
            w.write_header(&["a".into()]).unwrap();
            w.write_comment("Adaptation terminated").unwrap();
            w.flush().unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("# Adaptation terminated"));
    }

    #[test]
    fn test_second_header_rejected() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        let mut w = CsvWriter::create(file.path()).unwrap();
        w.write_header(&["a".into()]).unwrap();
        assert!(w.write_header(&["b".into()]).is_err());
    }
}
