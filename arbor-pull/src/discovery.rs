//! Remote configuration and ref discovery: everything that happens before
//! the transfer pipeline starts. Any failure here is fatal and aborts the
//! pull before queues exist.

use std::collections::BTreeMap;

use arbor::checksum::Digest;
use arbor::keyfile::KeyFile;
use arbor::refs::RefName;
use arbor::store::{ObjectStore, RepoMode};

use crate::fetcher::{self, Fetcher, TransportOptions};
use crate::progress::Progress;
use crate::{Cancel, Error};

/// Everything learned about the remote before any object is transferred.
pub(crate) struct Discovery {
    pub base_uri: String,
    pub remote_mode: RepoMode,
    pub gpg_verify: bool,
    /// Refs to record under the remote's namespace, resolved to commits.
    pub refs: BTreeMap<RefName, Digest>,
    /// Commits requested directly by digest.
    pub commits: Vec<Digest>,
}

pub(crate) fn discover<S: ObjectStore, F: Fetcher>(
    store: &S,
    fetcher: &mut F,
    remote: &str,
    refs_to_fetch: Option<&[String]>,
    progress: &Progress,
    cancel: &Cancel,
) -> Result<Discovery, Error> {
    let config = store.config();
    let group = format!("remote \"{remote}\"");

    let base_uri = parse_base_uri(&config.string(&group, "url")?)?;
    let gpg_verify = config.bool_or(&group, "gpg-verify", true)?;
    let tls_permissive = config.bool_or(&group, "tls-permissive", false)?;
    fetcher.configure(TransportOptions { tls_permissive })?;

    let remote_config = KeyFile::parse(&fetch_utf8(
        fetcher,
        &format!("{base_uri}/config"),
        progress,
        cancel,
    )?)
    .map_err(Error::Config)?;
    let mode = match remote_config.string("core", "mode") {
        Ok(mode) => mode.to_owned(),
        Err(err) if err.is_missing() => "bare".to_owned(),
        Err(err) => return Err(err.into()),
    };
    if !matches!(mode.parse::<RepoMode>(), Ok(RepoMode::ArchiveZ2)) {
        return Err(Error::UnsupportedMode(mode));
    }

    let mut refs = BTreeMap::new();
    let mut commits = Vec::new();

    match refs_to_fetch {
        Some(names) => {
            for name in names {
                if let Ok(checksum) = name.parse::<Digest>() {
                    commits.push(checksum);
                } else {
                    let name: RefName = name.parse()?;
                    let checksum = fetch_ref(fetcher, &base_uri, &name, progress, cancel)?;
                    refs.insert(name, checksum);
                }
            }
        }
        None => match config.string_list(&group, "branches")? {
            Some(branches) => {
                if branches.is_empty() {
                    println!("No configured branches for remote {remote}");
                }
                for branch in &branches {
                    let name: RefName = branch.parse()?;
                    let checksum = fetch_ref(fetcher, &base_uri, &name, progress, cancel)?;

                    // A configured branch we already track may be served as a
                    // delta from the revision we have.
                    if let Some(from) = store.resolve_rev(&format!("{remote}/{name}"), true)? {
                        if from != checksum
                            && fetch_delta_descriptor(
                                fetcher, &base_uri, &from, &checksum, progress, cancel,
                            )?
                            .is_some()
                        {
                            return Err(Error::StaticDelta);
                        }
                    }
                    refs.insert(name, checksum);
                }
            }
            None => {
                let summary = fetch_utf8(
                    fetcher,
                    &format!("{base_uri}/refs/summary"),
                    progress,
                    cancel,
                )?;
                refs = parse_ref_summary(&summary)?;
            }
        },
    }

    Ok(Discovery {
        base_uri,
        remote_mode: RepoMode::ArchiveZ2,
        gpg_verify,
        refs,
        commits,
    })
}

fn parse_base_uri(url: &str) -> Result<String, Error> {
    let url = url.trim_end_matches('/');
    match url.split_once("://") {
        Some(("http" | "https", rest)) if !rest.is_empty() => Ok(url.to_owned()),
        _ => Err(Error::InvalidUrl(url.to_owned())),
    }
}

fn fetch_utf8<F: Fetcher>(
    fetcher: &F,
    uri: &str,
    progress: &Progress,
    cancel: &Cancel,
) -> Result<String, Error> {
    progress.requesting(uri);
    let bytes = fetcher.fetch(uri, cancel)?;
    Ok(String::from_utf8(bytes)?)
}

/// Resolve a ref against the remote: fetch, trim, validate as a digest.
fn fetch_ref<F: Fetcher>(
    fetcher: &F,
    base_uri: &str,
    name: &RefName,
    progress: &Progress,
    cancel: &Cancel,
) -> Result<Digest, Error> {
    let contents = fetch_utf8(
        fetcher,
        &format!("{base_uri}/refs/heads/{name}"),
        progress,
        cancel,
    )?;
    Ok(contents.trim_end().parse()?)
}

/// Probe for a static delta descriptor between two commits. Absence is not
/// an error.
fn fetch_delta_descriptor<F: Fetcher>(
    fetcher: &F,
    base_uri: &str,
    from: &Digest,
    to: &Digest,
    progress: &Progress,
    cancel: &Cancel,
) -> Result<Option<Vec<u8>>, Error> {
    let uri = format!("{base_uri}/{}", delta_path(from, to));
    progress.requesting(&uri);
    match fetcher.fetch(&uri, cancel) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(fetcher::Error::NotFound { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Relative path of the static delta descriptor between two commits.
fn delta_path(from: &Digest, to: &Digest) -> String {
    let from = from.to_string();
    format!("deltas/{}/{}-{to}", &from[..2], &from[2..])
}

/// Parse a ref summary: one `<digest> <ref>` pair per non-empty line.
fn parse_ref_summary(contents: &str) -> Result<BTreeMap<RefName, Digest>, Error> {
    let mut refs = BTreeMap::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        let (checksum, name) = line.split_once(' ').ok_or(Error::MalformedSummary)?;
        let name: RefName = name.parse()?;
        refs.insert(name, checksum.parse()?);
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_uri() {
        assert_eq!(
            parse_base_uri("https://example.com/repo/").unwrap(),
            "https://example.com/repo"
        );
        assert_eq!(
            parse_base_uri("http://example.com").unwrap(),
            "http://example.com"
        );
        assert!(matches!(
            parse_base_uri("ftp://example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_base_uri("example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_base_uri("https://"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_ref_summary() {
        let a = Digest::digest(b"a");
        let b = Digest::digest(b"b");
        let summary = format!("{a} main\n{b} os/stable\n\n");
        let refs = parse_ref_summary(&summary).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[&"main".parse::<RefName>().unwrap()], a);
        assert_eq!(refs[&"os/stable".parse::<RefName>().unwrap()], b);
    }

    #[test]
    fn test_parse_ref_summary_rejects_malformed_lines() {
        assert!(matches!(
            parse_ref_summary("nospace\n"),
            Err(Error::MalformedSummary)
        ));
        assert!(matches!(
            parse_ref_summary("deadbeef main\n"),
            Err(Error::Checksum(_))
        ));
        let a = Digest::digest(b"a");
        assert!(matches!(
            parse_ref_summary(&format!("{a} ../main\n")),
            Err(Error::Ref(_))
        ));
    }

    #[test]
    fn test_delta_path() {
        let from = Digest::digest(b"from");
        let to = Digest::digest(b"to");
        let from_hex = from.to_string();
        let path = delta_path(&from, &to);
        assert!(path.starts_with(&format!("deltas/{}/", &from_hex[..2])));
        assert!(path.ends_with(&to.to_string()));
    }
}
