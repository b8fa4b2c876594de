//! A hand-written parser for our arguments. The option surface is small and
//! order-sensitive (input files must keep their command-line order because it
//! determines resolution priority), so a parser generator would buy us little.

use crate::error::Result;
use anyhow::anyhow;
use anyhow::bail;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;

pub(crate) struct Args {
    pub(crate) inputs: Vec<PathBuf>,
    pub(crate) output: PathBuf,
    pub(crate) is_static: bool,
    pub(crate) filler: Option<u8>,
    pub(crate) num_threads: NonZeroUsize,
    pub(crate) trace_files: bool,
    pub(crate) trace_symbols: Vec<String>,
    pub(crate) print_map: bool,
    pub(crate) print_stats: bool,
}

pub(crate) fn from_env() -> Result<Args> {
    parse(std::env::args())
}

/// Parses the supplied arguments. The first argument (the program name) is
/// skipped. Anything that doesn't start with '-' is an input path.
pub(crate) fn parse<S: AsRef<str>, I: Iterator<Item = S>>(mut input: I) -> Result<Args> {
    let mut inputs = Vec::new();
    let mut output = None;
    let mut is_static = false;
    let mut filler = None;
    let mut num_threads = None;
    let mut trace_files = false;
    let mut trace_symbols = Vec::new();
    let mut print_map = false;
    let mut print_stats = false;

    input.next();
    while let Some(arg) = input.next() {
        let arg = arg.as_ref();
        if arg == "-o" {
            output = Some(PathBuf::from(
                input
                    .next()
                    .ok_or_else(|| anyhow!("-o: missing argument"))?
                    .as_ref(),
            ));
        } else if arg == "-static" {
            is_static = true;
        } else if arg == "-filler" {
            let value = input
                .next()
                .ok_or_else(|| anyhow!("-filler: missing argument"))?;
            filler = Some(parse_filler(value.as_ref())?);
        } else if arg == "-thread-count" {
            let value = input
                .next()
                .ok_or_else(|| anyhow!("-thread-count: missing argument"))?;
            let n = value.as_ref().parse::<usize>().ok().and_then(NonZeroUsize::new);
            num_threads = Some(n.ok_or_else(|| {
                anyhow!(
                    "-thread-count: expected a positive integer, but got '{}'",
                    value.as_ref()
                )
            })?);
        } else if arg == "-trace" {
            trace_files = true;
        } else if arg == "-trace-symbol" {
            let name = input
                .next()
                .ok_or_else(|| anyhow!("-trace-symbol: missing argument"))?;
            trace_symbols.push(name.as_ref().to_owned());
        } else if arg == "-print-map" {
            print_map = true;
        } else if arg == "-stat" {
            print_stats = true;
        } else if arg.starts_with('-') {
            bail!("unknown argument '{arg}'");
        } else {
            inputs.push(PathBuf::from(arg));
        }
    }

    let num_threads = num_threads.unwrap_or_else(|| {
        std::thread::available_parallelism().unwrap_or(NonZeroUsize::new(1).unwrap())
    });

    Ok(Args {
        inputs,
        output: output.ok_or_else(|| anyhow!("-o option is missing"))?,
        is_static,
        filler,
        num_threads,
        trace_files,
        trace_symbols,
        print_map,
        print_stats,
    })
}

/// The filler is given as a hex byte, e.g. `-filler 0xcc`.
fn parse_filler(value: &str) -> Result<u8> {
    let Some(hex) = value.strip_prefix("0x") else {
        bail!("-filler: invalid argument '{value}'");
    };
    u8::from_str_radix(hex, 16).map_err(|_| anyhow!("-filler: invalid argument '{value}'"))
}

impl Args {
    pub(crate) fn setup_thread_pool(&self) -> Result {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads.get())
            .build_global()?;
        Ok(())
    }

    pub(crate) fn interpreter_path(&self) -> &'static Path {
        Path::new("/lib64/ld-linux-x86-64.so.2")
    }
}

#[cfg(test)]
mod tests {
    const INPUT1: &[&str] = &[
        "weld",
        "-o",
        "/tmp/out",
        "-static",
        "-filler",
        "0xcc",
        "-thread-count",
        "4",
        "-trace-symbol",
        "main",
        "-trace-symbol",
        "puts",
        "crt1.o",
        "crti.o",
        "a.o",
        "libx.a",
        "crtn.o",
    ];

    #[test]
    fn test_parse() {
        let args = super::parse(INPUT1.iter()).unwrap();
        assert_eq!(args.output.as_os_str(), "/tmp/out");
        assert!(args.is_static);
        assert_eq!(args.filler, Some(0xcc));
        assert_eq!(args.num_threads.get(), 4);
        assert_eq!(args.trace_symbols, ["main", "puts"]);
        assert_eq!(
            args.inputs
                .iter()
                .map(|p| p.to_str().unwrap())
                .collect::<Vec<_>>(),
            ["crt1.o", "crti.o", "a.o", "libx.a", "crtn.o"]
        );
        assert!(!args.print_map);
        assert!(!args.print_stats);
    }

    #[test]
    fn test_missing_output() {
        assert!(super::parse(["weld", "a.o"].iter()).is_err());
    }

    #[test]
    fn test_unknown_argument() {
        assert!(super::parse(["weld", "-o", "out", "-mystery"].iter()).is_err());
    }

    #[test]
    fn test_bad_filler() {
        assert!(super::parse(["weld", "-o", "out", "-filler", "cc"].iter()).is_err());
        assert!(super::parse(["weld", "-o", "out", "-filler", "0xzz"].iter()).is_err());
    }
}
