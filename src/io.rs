/*!
# Sample writers

A [`Writer`] receives newly produced samples from the driver, chain by chain,
as a run advances. Writers are only ever invoked from the driver thread.

[`TextFileWriter`] streams each chain into a tab-separated text file (or a
single combined file). The first line is a header of the form

```text
Generation<SEP>Param.0:<name0><SEP>...<SEP>Param.k:<namek><SEP>negLogL.<SEP>Likelihood<SEP>Prior
```

and every following line mirrors that order, with reals rendered to a
configurable number of significant digits (10 by default) and LF line
endings. An I/O failure terminates the run: streamed output cannot be
reconstructed after the fact.
*/

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::error::{Error, Result};
use crate::params::ParameterConfig;
use crate::sample::Chain;

/// Capability receiving streamed samples from the driver.
pub trait Writer: Send {
    /// Called once before the run starts producing samples.
    fn initialize(&mut self, number_of_chains: usize, params: &ParameterConfig) -> Result<()>;

    /// Writes `chain[start_index..]` in order for the given chain.
    fn write(&mut self, chain_index: usize, chain: &Chain, start_index: usize) -> Result<()>;

    /// Called once after the last sample has been written.
    fn finalize(&mut self) -> Result<()>;
}

/// Streams chains to text files, one per chain or one combined.
pub struct TextFileWriter {
    directory: PathBuf,
    stem: String,
    name_separator: String,
    extension: String,
    column_separator: u8,
    precision: usize,
    combine_chains: bool,
    files: Vec<csv::Writer<File>>,
}

impl TextFileWriter {
    /// A writer producing `<directory>/<stem>.<NN>.txt` per chain.
    pub fn new(directory: impl AsRef<Path>, stem: impl Into<String>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            stem: stem.into(),
            name_separator: ".".to_string(),
            extension: ".txt".to_string(),
            column_separator: b'\t',
            precision: 10,
            combine_chains: false,
            files: Vec::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_name_separator(mut self, separator: impl Into<String>) -> Self {
        self.name_separator = separator.into();
        self
    }

    /// Column separator byte; defaults to a single tab.
    pub fn with_column_separator(mut self, separator: u8) -> Self {
        self.column_separator = separator;
        self
    }

    /// Significant digits used for real values; defaults to 10.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision.max(1);
        self
    }

    /// Write all chains into one file instead of one file per chain.
    pub fn combine_chains(mut self, combine: bool) -> Self {
        self.combine_chains = combine;
        self
    }

    /// Target path for a chain (`None` in combined mode).
    pub fn file_path(&self, chain_index: Option<usize>) -> PathBuf {
        let mut name = self.stem.clone();
        if let Some(index) = chain_index {
            name.push_str(&self.name_separator);
            name.push_str(&format!("{index:02}"));
        }
        name.push_str(&self.extension);
        self.directory.join(name)
    }
}

impl Writer for TextFileWriter {
    fn initialize(&mut self, number_of_chains: usize, params: &ParameterConfig) -> Result<()> {
        self.files.clear();
        if number_of_chains == 0 {
            return Ok(());
        }
        std::fs::create_dir_all(&self.directory)?;

        let mut header: Vec<String> = Vec::with_capacity(params.len() + 4);
        header.push("Generation".to_string());
        for (i, parameter) in params.iter().enumerate() {
            header.push(format!("Param.{i}:{}", parameter.name()));
        }
        header.push("negLogL.".to_string());
        header.push("Likelihood".to_string());
        header.push("Prior".to_string());

        let file_count = if self.combine_chains {
            1
        } else {
            number_of_chains
        };
        for index in 0..file_count {
            let path = self.file_path((!self.combine_chains).then_some(index));
            let file = File::create(&path)?;
            let mut writer = WriterBuilder::new()
                .delimiter(self.column_separator)
                .terminator(Terminator::Any(b'\n'))
                .quote_style(QuoteStyle::Never)
                .from_writer(file);
            writer.write_record(&header)?;
            self.files.push(writer);
        }
        Ok(())
    }

    fn write(&mut self, chain_index: usize, chain: &Chain, start_index: usize) -> Result<()> {
        let file_index = if self.combine_chains { 0 } else { chain_index };
        let writer = self
            .files
            .get_mut(file_index)
            .ok_or(Error::WriterNotInitialized)?;

        let start = start_index.min(chain.len());
        for sample in &chain.as_slice()[start..] {
            let mut record: Vec<String> = Vec::with_capacity(sample.values.len() + 4);
            record.push(sample.generation.to_string());
            for &value in &sample.values {
                record.push(format_significant(value, self.precision));
            }
            record.push(format_significant(sample.neg_log_likelihood, self.precision));
            record.push(format_significant(sample.likelihood, self.precision));
            record.push(format_significant(sample.prior, self.precision));
            writer.write_record(&record)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        for writer in &mut self.files {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Renders `value` with the given number of significant digits, trimming
/// trailing zeros, switching to scientific notation outside `1e-4..10^digits`.
pub fn format_significant(value: f64, digits: usize) -> String {
    let digits = digits.max(1);
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= digits as i32 {
        let rendered = format!("{:.*e}", digits - 1, value);
        match rendered.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", trim_zeros(mantissa), exp),
            None => rendered,
        }
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(rendered: &str) -> &str {
    if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.')
    } else {
        rendered
    }
}
