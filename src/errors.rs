use thiserror::Error;

/// Error kinds surfaced by the gramtools core. Cache misses and individual
/// read failures are recovered locally and never produce one of these; only
/// malformed inputs and I/O failures propagate to the caller (spec §7).
#[derive(Error, Debug)]
pub enum GramError {
    #[error("malformed PRG: {0}")]
    MalformedPrg(String),

    #[error("corrupt kmer precalc entry: {0}")]
    CorruptPrecalc(String),

    #[error("inconsistent ploidy across genotyped sites")]
    InconsistentPloidy,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type GramResult<T> = Result<T, GramError>;
