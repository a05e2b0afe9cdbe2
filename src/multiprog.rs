//! Multi-program task dispatch: parses a per-task argv/program config.
//!
//! Config lines are `<rank-expression> <program> <args>`, where
//! rank-expression is `*`, a comma-separated list of ranks, or
//! dash-separated ranges. `\` escapes, single quotes preserve
//! whitespace, `%t` substitutes the task rank, `%o` substitutes the
//! offset of this rank within its matching rank-expression.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum RankSet {
    /// `*`: matches every task rank, with offset equal to the rank
    /// itself.
    Wildcard,
    Explicit(Vec<u32>),
}

impl RankSet {
    fn offset_of(&self, task_rank: u32) -> Option<usize> {
        match self {
            RankSet::Wildcard => Some(task_rank as usize),
            RankSet::Explicit(ranks) => ranks.iter().position(|&r| r == task_rank),
        }
    }
}

#[derive(Debug, Clone)]
struct RankExpr {
    ranks: RankSet,
    program: String,
    args: Vec<String>,
}

/// A single task's resolved program path and argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgram {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MultiProgConfig {
    lines: Vec<RankExpr>,
}

impl MultiProgConfig {
    /// Parses `text` into a set of rank expressions. Blank lines and
    /// lines starting with `#` are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens = tokenize(line)?;
            let mut it = tokens.into_iter();
            let rank_field = it
                .next()
                .ok_or_else(|| Error::ReservationInvalid(format!("malformed multi-prog line: {raw}")))?;
            let program = it
                .next()
                .ok_or_else(|| Error::ReservationInvalid(format!("missing program in line: {raw}")))?;
            let args: Vec<String> = it.collect();
            let ranks = parse_rank_expr(&rank_field)?;
            lines.push(RankExpr { ranks, program, args });
        }
        Ok(Self { lines })
    }

    /// Resolves the program and argv for `task_rank`, substituting `%t`
    /// (task rank) and `%o` (offset within the matching rank-expression)
    /// in every argument, then resolving a bare program name (no `/`
    /// prefix) against `PATH`.
    pub fn program_for(&self, task_rank: u32) -> Result<TaskProgram> {
        for expr in &self.lines {
            if let Some(offset) = expr.ranks.offset_of(task_rank) {
                let subst = |s: &str| -> String {
                    s.replace("%t", &task_rank.to_string()).replace("%o", &offset.to_string())
                };
                let path_var = std::env::var("PATH").unwrap_or_default();
                return Ok(TaskProgram {
                    program: resolve_against_path(&subst(&expr.program), &path_var),
                    args: expr.args.iter().map(|a| subst(a)).collect(),
                });
            }
        }
        Err(Error::not_found(format!("no multi-prog entry for task rank {task_rank}")))
    }
}

fn parse_rank_expr(field: &str) -> Result<RankSet> {
    if field == "*" {
        return Ok(RankSet::Wildcard);
    }
    let mut ranks = Vec::new();
    for part in field.split(',') {
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo
                .parse()
                .map_err(|_| Error::ReservationInvalid(format!("bad rank range: {part}")))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| Error::ReservationInvalid(format!("bad rank range: {part}")))?;
            ranks.extend(lo..=hi);
        } else {
            let r: u32 = part
                .parse()
                .map_err(|_| Error::ReservationInvalid(format!("bad rank: {part}")))?;
            ranks.push(r);
        }
    }
    Ok(RankSet::Explicit(ranks))
}

/// Resolves a program name against a `:`-separated `PATH` string,
/// leaving anything starting with `/` untouched. Falls back to the
/// input unchanged if no executable match is found on `PATH`, matching
/// exec(3)'s own behaviour of trying the literal name.
fn resolve_against_path(program: &str, path_var: &str) -> String {
    if program.starts_with('/') {
        return program.to_string();
    }
    for dir in path_var.split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = std::path::Path::new(dir).join(program);
        if is_executable(&candidate) {
            return candidate.to_string_lossy().into_owned();
        }
    }
    program.to_string()
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

/// Splits a line into whitespace-separated tokens, honoring `\` escapes
/// and single-quote-preserves-whitespace semantics.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                } else {
                    return Err(Error::ReservationInvalid("trailing escape character".into()));
                }
            }
            '\'' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(Error::ReservationInvalid("unterminated quote".into()));
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_and_range_ranks() {
        let cfg = MultiProgConfig::parse("0,2-3 /bin/echo hello\n").unwrap();
        assert_eq!(cfg.program_for(0).unwrap().program, "/bin/echo");
        assert_eq!(cfg.program_for(2).unwrap().args, vec!["hello".to_string()]);
        assert_eq!(cfg.program_for(3).unwrap().program, "/bin/echo");
        assert!(cfg.program_for(4).is_err());
    }

    #[test]
    fn substitutes_task_rank_and_offset() {
        let cfg = MultiProgConfig::parse("5-7 /bin/app --rank=%t --offset=%o\n").unwrap();
        let p = cfg.program_for(6).unwrap();
        assert_eq!(p.args, vec!["--rank=6".to_string(), "--offset=1".to_string()]);
    }

    #[test]
    fn single_quotes_preserve_whitespace() {
        let cfg = MultiProgConfig::parse("0 /bin/app 'hello world'\n").unwrap();
        let p = cfg.program_for(0).unwrap();
        assert_eq!(p.args, vec!["hello world".to_string()]);
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let cfg = MultiProgConfig::parse("\n# comment\n0 /bin/true\n").unwrap();
        assert_eq!(cfg.program_for(0).unwrap().program, "/bin/true");
    }

    #[test]
    fn wildcard_matches_every_rank_with_offset_equal_to_rank() {
        let cfg = MultiProgConfig::parse("* /bin/app --offset=%o\n").unwrap();
        assert_eq!(cfg.program_for(0).unwrap().args, vec!["--offset=0".to_string()]);
        assert_eq!(cfg.program_for(41).unwrap().args, vec!["--offset=41".to_string()]);
    }

    #[test]
    fn absolute_program_path_is_never_path_resolved() {
        assert_eq!(resolve_against_path("/opt/app/bin", "/usr/bin:/bin"), "/opt/app/bin");
    }

    #[test]
    fn bare_program_name_resolves_to_executable_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("myapp");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let path_var = dir.path().to_string_lossy().into_owned();
        assert_eq!(resolve_against_path("myapp", &path_var), bin.to_string_lossy());
    }

    #[test]
    fn bare_program_name_falls_back_unresolved_when_not_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let path_var = dir.path().to_string_lossy().into_owned();
        assert_eq!(resolve_against_path("nosuchprogram", &path_var), "nosuchprogram");
    }
}
