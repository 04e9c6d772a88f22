//! # Puppetfile Reader
//!
//! Reads the `mod` declarations of an r10k Puppetfile:
//!
//! ```ruby
//! forge 'https://forge.puppet.com'
//! mod 'puppetlabs-stdlib', '4.25.1'
//! mod 'puppetlabs/ntp', '6.4.1'
//! mod 'apache', :latest
//! mod 'teamx',
//!   :git => 'https://git.example.com/teamx.git',
//!   :ref => 'ced1b64'
//! mod 'motd', git: 'https://git.example.com/motd.git', tag: 'v1.2.0'
//! ```
//!
//! Other directives are ignored. Nothing is evaluated; the file is read as
//! data.

use std::path::Path;

use pem_core::{PemError, Result};

/// How a git module is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    /// `:ref =>`
    Ref(String),
    /// `:tag =>`
    Tag(String),
    /// `:commit =>`
    Commit(String),
    /// `:branch =>`
    Branch(String),
}

impl GitRef {
    /// The ref string regardless of kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ref(r) | Self::Tag(r) | Self::Commit(r) | Self::Branch(r) => r,
        }
    }

    /// Whether the ref looks like a commit id.
    pub fn is_commit(&self) -> bool {
        match self {
            Self::Commit(_) => true,
            Self::Ref(r) => r.len() >= 6 && r.chars().all(|c| c.is_ascii_hexdigit()),
            Self::Tag(_) | Self::Branch(_) => false,
        }
    }
}

/// Where a declared module comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    /// Registry module; `None` when unpinned (`:latest` or no version).
    Forge {
        /// Pinned version.
        version: Option<String>,
    },
    /// Git module.
    Git {
        /// Clone URL.
        remote: String,
        /// Pin, if any.
        reference: Option<GitRef>,
    },
}

/// One `mod` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuppetfileModule {
    /// Author segment, when the declaration has one.
    pub author: Option<String>,
    /// Module segment; the directory name inside an environment.
    pub name: String,
    /// Source and pin.
    pub kind: ModuleKind,
}

impl PuppetfileModule {
    /// `author-name`, when an author is known.
    pub fn full_name(&self) -> Option<String> {
        self.author.as_ref().map(|a| format!("{a}-{}", self.name))
    }

    /// The version this declaration pins, as the legacy resolver reports it.
    pub fn pinned_version(&self) -> Option<&str> {
        match &self.kind {
            ModuleKind::Forge { version } => version.as_deref(),
            ModuleKind::Git { reference, .. } => reference.as_ref().map(GitRef::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Sym(String),
    Key(String),
    Arrow,
}

fn tokenize(stmt: &str, line: usize) -> Result<Vec<Token>> {
    let err = |msg: &str| PemError::Config(format!("Puppetfile line {line}: {msg}"));
    let mut out = Vec::new();
    let mut chars = stmt.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            '\'' | '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some('\\') => {
                            if let Some(esc) = chars.next() {
                                s.push(esc);
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err(err("unterminated string")),
                    }
                }
                out.push(Token::Str(s));
            }
            ':' => {
                chars.next();
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Token::Sym(s));
            }
            '=' => {
                chars.next();
                if chars.next() != Some('>') {
                    return Err(err("expected '=>'"));
                }
                out.push(Token::Arrow);
            }
            '#' => break,
            c if c.is_alphanumeric() || c == '_' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&':') {
                    chars.next();
                    out.push(Token::Key(s));
                } else {
                    out.push(Token::Sym(s));
                }
            }
            _ => return Err(err(&format!("unexpected character {c:?}"))),
        }
    }
    Ok(out)
}

fn split_name(raw: &str) -> (Option<String>, String) {
    match raw.split_once(|c| c == '-' || c == '/') {
        Some((a, n)) => (Some(a.to_string()), n.to_string()),
        None => (None, raw.to_string()),
    }
}

fn parse_mod(tokens: &[Token], line: usize) -> Result<PuppetfileModule> {
    let err = |msg: &str| PemError::Config(format!("Puppetfile line {line}: {msg}"));
    let raw_name = match tokens.first() {
        Some(Token::Str(s)) => s.clone(),
        _ => return Err(err("mod needs a quoted name")),
    };

    let mut pos = 1;
    let mut version = None;
    match (tokens.get(pos), tokens.get(pos + 1)) {
        (Some(Token::Str(v)), _) => {
            version = Some(v.clone());
            pos += 1;
        }
        // `:latest` and friends leave the module unpinned.
        (Some(Token::Sym(s)), None | Some(Token::Sym(_)) | Some(Token::Key(_))) => {
            tracing::debug!(module = %raw_name, symbol = %s, "unpinned module");
            pos += 1;
        }
        _ => {}
    }

    let mut remote = None;
    let mut reference = None;
    while pos < tokens.len() {
        let key = match &tokens[pos] {
            Token::Sym(k) => {
                if tokens.get(pos + 1) != Some(&Token::Arrow) {
                    return Err(err("expected '=>' after option"));
                }
                pos += 2;
                k
            }
            Token::Key(k) => {
                pos += 1;
                k
            }
            _ => return Err(err("expected an option")),
        };
        let value = match tokens.get(pos) {
            Some(Token::Str(v)) | Some(Token::Sym(v)) => v.clone(),
            _ => return Err(err(&format!("option {key} needs a value"))),
        };
        pos += 1;
        match key.as_str() {
            "git" => remote = Some(value),
            "ref" => reference = Some(GitRef::Ref(value)),
            "tag" => reference = Some(GitRef::Tag(value)),
            "commit" => reference = Some(GitRef::Commit(value)),
            "branch" => reference = Some(GitRef::Branch(value)),
            other => tracing::debug!(module = %raw_name, option = other, "ignoring Puppetfile option"),
        }
    }

    let (author, name) = split_name(&raw_name);
    let kind = match remote {
        Some(remote) => ModuleKind::Git { remote, reference },
        None => ModuleKind::Forge { version },
    };
    Ok(PuppetfileModule { author, name, kind })
}

/// `line` with any trailing `#` comment outside quotes removed.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '#') => return line[..i].trim_end(),
            _ => {}
        }
    }
    line
}

/// Parse Puppetfile text.
pub fn parse(text: &str) -> Result<Vec<PuppetfileModule>> {
    let mut modules = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = strip_comment(raw.trim());
        if line.is_empty() {
            continue;
        }
        match current.as_mut() {
            Some((_, stmt)) => {
                stmt.push(' ');
                stmt.push_str(line);
            }
            None => {
                if let Some(rest) = line.strip_prefix("mod ").or_else(|| line.strip_prefix("mod\t")) {
                    current = Some((idx + 1, rest.to_string()));
                } else {
                    continue;
                }
            }
        }
        if !line.ends_with(',') {
            if let Some((start, stmt)) = current.take() {
                modules.push(parse_mod(&tokenize(&stmt, start)?, start)?);
            }
        }
    }
    if let Some((start, stmt)) = current {
        modules.push(parse_mod(&tokenize(&stmt, start)?, start)?);
    }
    Ok(modules)
}

/// Read and parse `Puppetfile` at `path`.
pub fn load(path: &Path) -> Result<Vec<PuppetfileModule>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PemError::io(format!("reading {}", path.display()), e))?;
    parse(&text)
}
