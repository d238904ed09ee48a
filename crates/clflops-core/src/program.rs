//! Kernel program build for one device.

use tracing::{info, warn};

use crate::backend::ComputeBackend;
use crate::device::Device;
use crate::error::{BenchError, Result};
use crate::dispatch::Strategy;

/// Entry points every benchmark program must define.
pub fn required_entry_points() -> [&'static str; 2] {
    Strategy::ALL.map(Strategy::kernel_name)
}

/// Whether `source` declares a kernel function called `name`.
///
/// Looks for the token sequence `kernel void <name>` (either `kernel` or
/// `__kernel`). Block and line comments are skipped, as are
/// `__attribute__((...))` groups anywhere in the declaration.
pub fn declares_kernel(source: &str, name: &str) -> bool {
    let code = strip_attributes(&strip_comments(source));
    let tokens: Vec<&str> = code
        .split(|c: char| !is_ident(c))
        .filter(|t| !t.is_empty())
        .collect();
    tokens.windows(3).any(|w| {
        matches!(w[0], "kernel" | "__kernel") && w[1] == "void" && w[2] == name
    })
}

/// Entry points from [`required_entry_points`] that `source` lacks.
pub fn missing_entry_points(source: &str) -> Vec<&'static str> {
    required_entry_points().into_iter().filter(|name| !declares_kernel(source, name)).collect()
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        let block = rest.find("/*");
        let line = rest.find("//");
        let next = match (block, line) {
            (Some(b), Some(l)) => Some(b.min(l)),
            (b, l) => b.or(l),
        };
        let Some(at) = next else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..at]);
        out.push(' ');
        let tail = &rest[at..];
        let skip = if tail.starts_with("/*") {
            tail.find("*/").map_or(tail.len(), |end| end + 2)
        } else {
            tail.find('\n').unwrap_or(tail.len())
        };
        rest = &tail[skip..];
    }
}

const ATTRIBUTE: &str = "__attribute__";

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn strip_attributes(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(at) = rest.find(ATTRIBUTE) {
        let after = &rest[at + ATTRIBUTE.len()..];
        let standalone = !rest[..at].ends_with(is_ident) && !after.starts_with(is_ident);
        let args = after.trim_start();
        if !standalone || !args.starts_with('(') {
            out.push_str(&rest[..at + ATTRIBUTE.len()]);
            rest = after;
            continue;
        }
        out.push_str(&rest[..at]);
        out.push(' ');
        let mut depth = 0usize;
        let mut end = args.len();
        for (i, c) in args.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        rest = &args[end..];
    }
    out.push_str(rest);
    out
}

/// Compile `source` for `device`.
///
/// # Errors
///
/// [`BenchError::Build`] with the compiler log when compilation fails, or
/// when the program lacks one of the benchmark entry points.
pub fn build<B: ComputeBackend>(backend: &B, device: &Device, source: &str) -> Result<B::Program> {
    let missing = missing_entry_points(source);
    if !missing.is_empty() {
        let log = missing
            .iter()
            .map(|name| format!("error: no kernel named '{name}' in program source"))
            .collect::<Vec<_>>()
            .join("\n");
        warn!("Program for '{}' lacks entry points: {:?}", device.name, missing);
        return Err(BenchError::Build { device: device.name.clone(), log });
    }

    match backend.build(device, source) {
        Ok(program) => {
            info!("Compiled program for '{}' ({})", device.name, backend.name());
            Ok(program)
        }
        Err(e) => {
            warn!("Failed to compile program for '{}': {}", device.name, e);
            Err(e)
        }
    }
}
