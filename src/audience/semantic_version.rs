use std::{cmp::Ordering, str::FromStr};

use semver::BuildMetadata;

use super::MatchError;

/// Version in `MAJOR[.MINOR[.PATCH]][-PRERELEASE][+BUILD]` form.
///
/// Unlike [`semver::Version`], minor and patch components may be omitted, and numeric prerelease
/// identifiers may have leading zeros (`1.2.3-rc.007`). When a version is used as a condition
/// target, omitted components act as wildcards (see [`SemanticVersion::compare_to`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticVersion {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
    prerelease: Vec<String>,
    build: BuildMetadata,
}

impl SemanticVersion {
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// Build metadata. Never taken into account when comparing versions.
    pub fn build(&self) -> &BuildMetadata {
        &self.build
    }

    /// Compare user version `self` against condition version `target`.
    ///
    /// Only the numeric components present in `target` are compared, so `"3.7.1"` is equal to a
    /// target of `"3.7"`. A component missing from `self` but present in `target` ranks lower. A
    /// version without prerelease ranks higher than the same version with one. Build metadata is
    /// ignored.
    pub fn compare_to(&self, target: &SemanticVersion) -> Ordering {
        let numeric = self.major.cmp(&target.major).then_with(|| {
            compare_optional(self.minor, target.minor)
                .then_with(|| compare_optional(self.patch, target.patch))
        });
        if numeric != Ordering::Equal {
            return numeric;
        }

        match (self.is_prerelease(), target.is_prerelease()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (true, true) => self
                .prerelease
                .iter()
                .zip(&target.prerelease)
                .map(|(user, target)| compare_identifiers(user, target))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| self.prerelease.len().cmp(&target.prerelease.len())),
        }
    }
}

fn compare_optional(user: Option<u64>, target: Option<u64>) -> Ordering {
    match (user, target) {
        (_, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(user), Some(target)) => user.cmp(&target),
    }
}

/// Numeric identifiers compare numerically and rank below alphanumeric ones, which compare in
/// ASCII order.
fn compare_identifiers(user: &str, target: &str) -> Ordering {
    match (numeric_identifier(user), numeric_identifier(target)) {
        (Some(user), Some(target)) => user.cmp(&target),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => user.cmp(target),
    }
}

fn numeric_identifier(identifier: &str) -> Option<u64> {
    if identifier.bytes().all(|b| b.is_ascii_digit()) {
        identifier.parse().ok()
    } else {
        None
    }
}

fn is_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl FromStr for SemanticVersion {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MatchError::InvalidSemanticVersion(s.to_owned());

        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (version, build) = match s.split_once('+') {
            Some((version, build)) => {
                if build.is_empty() || build.contains('+') {
                    return Err(invalid());
                }
                (
                    version,
                    BuildMetadata::new(build).map_err(|_| invalid())?,
                )
            }
            None => (s, BuildMetadata::EMPTY),
        };

        let (core, prerelease) = match version.split_once('-') {
            Some((core, prerelease)) => {
                let identifiers: Vec<String> =
                    prerelease.split('.').map(str::to_owned).collect();
                if !identifiers.iter().all(|identifier| is_identifier(identifier)) {
                    return Err(invalid());
                }
                (core, identifiers)
            }
            None => (version, Vec::new()),
        };

        let mut components = Vec::with_capacity(3);
        for part in core.split('.') {
            let leading_zero = part.len() > 1 && part.starts_with('0');
            if part.is_empty() || leading_zero || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            components.push(part.parse::<u64>().map_err(|_| invalid())?);
        }

        let (major, minor, patch) = match components[..] {
            [major] => (major, None, None),
            [major, minor] => (major, Some(minor), None),
            [major, minor, patch] => (major, Some(minor), Some(patch)),
            _ => return Err(invalid()),
        };

        Ok(SemanticVersion {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}
