//! Writer configuration parsed from `KEY=VALUE` creation options.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Options consumed by [`RasterWriter`](crate::RasterWriter).
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    /// Compression worker threads; zero keeps all encoding on the caller's thread.
    pub num_threads: usize,
    /// Reusable job slots; `None` picks twice the thread count.
    pub job_slots: Option<usize>,
    /// Keep all-background blocks as holes, even at close.
    pub sparse_ok: bool,
    /// Claim that blocks appear on disk in ascending id order.
    pub block_order_row_major: bool,
    /// Surround every block with a size leader and a repeated trailer.
    pub block_framing: bool,
    /// No-data value that empty blocks are filled with.
    pub background: Option<f64>,
    /// Opaque predictor forwarded to the codec.
    pub predictor: u16,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            job_slots: None,
            sparse_ok: false,
            block_order_row_major: false,
            block_framing: false,
            background: None,
            predictor: 1,
        }
    }
}

impl WriterOptions {
    /// Build options from `(key, value)` pairs. Keys are case-insensitive;
    /// unknown keys are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut opts = Self::default();
        for (key, value) in pairs {
            opts.set(key.as_ref(), value.as_ref())?;
        }
        Ok(opts)
    }

    /// Apply a single option.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        match key.to_ascii_uppercase().as_str() {
            "NUM_THREADS" => {
                self.num_threads = if value.eq_ignore_ascii_case("ALL_CPUS") {
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1)
                } else {
                    value.parse().map_err(|_| invalid("expected an integer or ALL_CPUS"))?
                };
            }
            "JOB_SLOTS" => {
                let slots: usize = value.parse().map_err(|_| invalid("expected an integer"))?;
                if slots == 0 {
                    return Err(invalid("at least one slot is required"));
                }
                self.job_slots = Some(slots);
            }
            "SPARSE_OK" => self.sparse_ok = parse_bool(value).ok_or_else(|| invalid("expected a boolean"))?,
            "COG" => {
                let on = parse_bool(value).ok_or_else(|| invalid("expected a boolean"))?;
                self.block_order_row_major = on;
                self.block_framing = on;
            }
            "BLOCK_ORDER" => {
                self.block_order_row_major = match value.to_ascii_uppercase().as_str() {
                    "ROW_MAJOR" => true,
                    "ANY" => false,
                    _ => return Err(invalid("expected ROW_MAJOR or ANY")),
                }
            }
            "BLOCK_FRAMING" => {
                self.block_framing = parse_bool(value).ok_or_else(|| invalid("expected a boolean"))?
            }
            "NODATA" => {
                let v = if value.eq_ignore_ascii_case("nan") {
                    f64::NAN
                } else {
                    value.parse().map_err(|_| invalid("expected a number or nan"))?
                };
                self.background = Some(v);
            }
            "PREDICTOR" => {
                self.predictor = match value {
                    "1" => 1,
                    "2" => 2,
                    _ => return Err(invalid("expected 1 (none) or 2 (horizontal differencing)")),
                }
            }
            _ => return Err(invalid("unknown option")),
        }
        Ok(())
    }

    /// Job slots actually allocated for a pool built from these options.
    pub fn effective_job_slots(&self) -> usize {
        self.job_slots.unwrap_or(self.num_threads * 2).max(1)
    }

    /// Sparse skipping is active while writing when holes are allowed, or
    /// when the codec stores raw bytes and holes can be filled cheaply at close.
    ///
    /// A deferred block would be appended behind higher ids at close, so the
    /// store codec writes empty blocks at once under a row-major claim.
    pub fn skip_empty_blocks(&self, store_codec: bool) -> bool {
        self.sparse_ok || (store_codec && !self.block_order_row_major)
    }
}

/// One `KEY=VALUE` pair as given on a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionPair {
    pub key: String,
    pub value: String,
}

impl FromStr for OptionPair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s.split_once('=').ok_or_else(|| Error::InvalidOption {
            key: s.to_string(),
            value: String::new(),
            reason: "expected KEY=VALUE".to_string(),
        })?;
        Ok(Self {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "ON" | "1" => Some(true),
        "NO" | "FALSE" | "OFF" | "0" => Some(false),
        _ => None,
    }
}
