use std::fmt;

use crate::Error;
use crate::Result;

/// Parsed `host:port[,host:port...][/chroot]` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    raw: String,
    hosts: Vec<String>,
    chroot: Option<String>,
}

impl ConnectionTarget {
    pub fn parse(target: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let trimmed = target.trim();
        if trimmed.is_empty() {
            return Err(invalid("target is empty"));
        }
        if trimmed.ends_with('/') {
            return Err(invalid("target may not end with /"));
        }

        let (host_part, chroot) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], Some(trimmed[idx..].to_string())),
            None => (trimmed, None),
        };

        let hosts: Vec<String> = host_part
            .split(',')
            .map(str::trim)
            .map(str::to_string)
            .collect();
        if hosts.iter().any(String::is_empty) {
            return Err(invalid("empty host in server list"));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            hosts,
            chroot,
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn chroot(&self) -> Option<&str> {
        self.chroot.as_deref()
    }

    pub fn is_chrooted(&self) -> bool {
        self.chroot.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Remove the chroot prefix from a path reported by the server.
    pub fn strip_chroot(
        &self,
        path: &str,
    ) -> String {
        let Some(chroot) = self.chroot.as_deref() else {
            return path.to_string();
        };

        match path.strip_prefix(chroot) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
