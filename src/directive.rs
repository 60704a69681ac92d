use std::path::{Path, PathBuf};

use crate::error::{JqsError, Result};

/// Resource and placement requests extracted from a script's `#JS` header.
/// Every field is optional; submission fills in the defaults.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Directives {
    pub name: Option<String>,
    pub cores: Option<u32>,
    pub mem_mb: Option<u64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub workdir: Option<PathBuf>,
    pub time_limit_sec: Option<u64>,
}

pub fn parse_file(path: &Path) -> Result<Directives> {
    let text = std::fs::read_to_string(path)?;
    parse_script(&text)
}

/// Parse `#JS key=value ...` lines from the script header.
///
/// The header is the first contiguous run of blank and `#`-comment lines;
/// the first other line ends it. A directive line is one whose first
/// non-whitespace characters are `#JS` followed by whitespace (or nothing).
pub fn parse_script(text: &str) -> Result<Directives> {
    let mut directives = Directives::default();

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('#') {
            break;
        }
        let rest = match trimmed.strip_prefix("#JS") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
            // "#JSx" and plain comments are header noise, not directives.
            _ => continue,
        };
        for (key, value) in tokenize(rest, lineno)? {
            apply(&mut directives, &key, &value, lineno)?;
        }
    }

    Ok(directives)
}

/// Split one directive payload into `key=value` pairs. Values are either a
/// bare token or a double-quoted string with `\"` and `\\` escapes.
fn tokenize(rest: &str, lineno: usize) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return Ok(pairs);
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(c) if c.is_whitespace() => {
                    return Err(bad(lineno, format!("token {key:?} is not key=value")))
                }
                Some(c) => key.push(c),
                None => return Err(bad(lineno, format!("token {key:?} is not key=value"))),
            }
        }
        if key.is_empty() {
            return Err(bad(lineno, "empty key before '='".to_string()));
        }

        let value = match chars.peek() {
            Some('"') => {
                chars.next();
                let mut out = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('"') => out.push('"'),
                            Some('\\') => out.push('\\'),
                            Some(c) => {
                                return Err(bad(lineno, format!("invalid escape \\{c} in value")))
                            }
                            None => return Err(bad(lineno, "dangling escape in value".into())),
                        },
                        Some('"') => break,
                        Some(c) => out.push(c),
                        None => {
                            return Err(bad(lineno, format!("unterminated string for key {key:?}")))
                        }
                    }
                }
                if chars.peek().is_some_and(|c| !c.is_whitespace()) {
                    return Err(bad(
                        lineno,
                        format!("trailing characters after quoted value of {key:?}"),
                    ));
                }
                out
            }
            _ => {
                let mut out = String::new();
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    out.push(c);
                }
                if out.is_empty() {
                    return Err(bad(lineno, format!("missing value for key {key:?}")));
                }
                out
            }
        };

        pairs.push((key, value));
    }
}

fn apply(directives: &mut Directives, key: &str, value: &str, lineno: usize) -> Result<()> {
    match key {
        "name" => directives.name = Some(value.to_string()),
        "cores" => {
            let cores = positive_int(value, key, lineno)?;
            if cores > u32::MAX as u64 {
                return Err(bad(lineno, format!("cores value {cores} is out of range")));
            }
            directives.cores = Some(cores as u32);
        }
        "mem_mb" => directives.mem_mb = Some(positive_int(value, key, lineno)?),
        "stdout" => directives.stdout = Some(value.to_string()),
        "stderr" => directives.stderr = Some(value.to_string()),
        "workdir" => directives.workdir = Some(PathBuf::from(value)),
        "time_limit" => directives.time_limit_sec = Some(parse_time_limit(value, lineno)?),
        _ => {
            tracing::warn!(key, line = lineno, "ignoring unknown directive key");
        }
    }
    Ok(())
}

fn positive_int(value: &str, key: &str, lineno: usize) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(v) if v >= 1 => Ok(v),
        _ => Err(bad(
            lineno,
            format!("{key} must be a positive integer, got {value:?}"),
        )),
    }
}

/// `HH:MM:SS` with unbounded hours; minutes and seconds below 60.
fn parse_time_limit(value: &str, lineno: usize) -> Result<u64> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return Err(bad(lineno, format!("time_limit must be HH:MM:SS, got {value:?}")));
    }
    let field = |s: &str| -> Result<u64> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad(lineno, format!("time_limit must be HH:MM:SS, got {value:?}")));
        }
        s.parse()
            .map_err(|_| bad(lineno, format!("time_limit component out of range in {value:?}")))
    };
    let (hh, mm, ss) = (field(parts[0])?, field(parts[1])?, field(parts[2])?);
    if mm >= 60 || ss >= 60 {
        return Err(bad(
            lineno,
            format!("minutes and seconds must be below 60 in {value:?}"),
        ));
    }
    Ok(hh * 3600 + mm * 60 + ss)
}

fn bad(line: usize, reason: String) -> JqsError {
    JqsError::BadDirective { line, reason }
}
