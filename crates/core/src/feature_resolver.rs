//! Feature resolution
//!
//! Resolving turns the user's `{reference -> options}` map into an ordered
//! list of installable features: fetch each archive (local path, tarball
//! URL, or OCI artifact), merge options over metadata defaults, close over
//! hard dependencies, and compute a deterministic install order.
//!
//! Ordering rules, in priority:
//! 1. `dependsOn` is a hard partial order: dependencies install first, and a
//!    cycle is fatal (the error names the participating features).
//! 2. An explicit user override list, when present, is authoritative and must
//!    be a linear extension of the hard order.
//! 3. `installsAfter` hints break ties softly: a hinted feature is emitted
//!    later when possible.
//! 4. Remaining ties break by lexicographic feature id.

use crate::errors::{DcxError, FeatureError, Result};
use crate::feature_ref::{FeatureSource, OciFeatureRef};
use crate::features::{merge_options, parse_feature_metadata, ResolvedFeature};
use crate::hashing::sha256_hex;
use crate::lockfile::Lockfile;
use flate2::read::GzDecoder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Caller knobs for a resolve pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Bypass the on-disk archive cache (still deduplicates within the run)
    pub force_pull: bool,
    /// Fail on any divergence from the lockfile
    pub frozen: bool,
}

/// Cached fetch metadata written next to an extracted archive
#[derive(Debug, Serialize, Deserialize)]
struct FetchMeta {
    digest: Option<String>,
    integrity: String,
    version: Option<String>,
}

/// Resolves feature references into ordered, pinned features.
pub struct FeatureResolver {
    http: reqwest::Client,
    /// Base directory for relative local-path references
    config_dir: PathBuf,
    /// On-disk archive cache, reused across runs
    cache_dir: PathBuf,
    /// Per-run memoization keyed by (source, version)
    memo: HashMap<String, ResolvedFeature>,
}

impl FeatureResolver {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            http: reqwest::Client::new(),
            config_dir: config_dir.to_path_buf(),
            cache_dir: std::env::temp_dir().join("dcx-feature-cache"),
            memo: HashMap::new(),
        }
    }

    /// Override the archive cache location (used by tests).
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = dir;
        self
    }

    /// Resolve the user's feature map into an ordered install list.
    #[instrument(skip(self, user_features, lockfile))]
    pub async fn resolve(
        &mut self,
        user_features: &IndexMap<String, serde_json::Value>,
        override_order: Option<&[String]>,
        lockfile: Option<&Lockfile>,
        opts: ResolveOptions,
    ) -> Result<Vec<ResolvedFeature>> {
        if user_features.is_empty() {
            return Ok(Vec::new());
        }

        // Fetch the requested features, then close over hard dependencies.
        let mut resolved: IndexMap<String, ResolvedFeature> = IndexMap::new();
        let mut queue: Vec<(String, serde_json::Value)> = user_features
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();

        while let Some((reference, options_value)) = queue.pop() {
            if resolved.contains_key(&reference) {
                continue;
            }
            let feature = self.fetch(&reference, &options_value, opts).await?;
            for (dep_ref, dep_options) in &feature.metadata.depends_on {
                if !resolved.contains_key(dep_ref) {
                    queue.push((dep_ref.clone(), dep_options.clone()));
                }
            }
            resolved.insert(reference, feature);
        }

        if opts.frozen {
            verify_frozen(lockfile, resolved.values())?;
        }

        let nodes: Vec<OrderNode> = resolved
            .values()
            .map(|f| OrderNode {
                id: f.id.clone(),
                short_name: short_name(&f.source).to_string(),
                depends_on: f.depends_on.clone(),
                installs_after: f.metadata.installs_after.clone(),
            })
            .collect();
        let order = compute_install_order(&nodes, override_order)?;

        let mut out = Vec::with_capacity(order.len());
        for id in order {
            let feature = resolved
                .shift_remove(&id)
                .ok_or_else(|| DcxError::internal(format!("ordered unknown feature '{}'", id)))?;
            out.push(feature);
        }
        debug!(
            order = ?out.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            "Computed feature install order"
        );
        Ok(out)
    }

    /// Fetch one feature, at most once per (source, version) per run.
    async fn fetch(
        &mut self,
        reference: &str,
        options_value: &serde_json::Value,
        opts: ResolveOptions,
    ) -> Result<ResolvedFeature> {
        let source = FeatureSource::parse(reference)?;
        let key = source.cache_key();
        if let Some(hit) = self.memo.get(&key) {
            let mut feature = hit.clone();
            feature.id = reference.to_string();
            feature.options = merge_options(&feature.metadata, options_value);
            return Ok(feature);
        }

        let (install_root, digest, integrity, fetched_version) = match &source {
            FeatureSource::Local(path) => self.fetch_local(path)?,
            FeatureSource::Tarball(url) => self.fetch_tarball(url, opts).await?,
            FeatureSource::Oci(oci) => self.fetch_oci(oci, opts).await?,
        };

        let metadata = parse_feature_metadata(&install_root)?;
        let version = metadata.version.clone().or(fetched_version);
        let options = merge_options(&metadata, options_value);
        let depends_on: Vec<String> = metadata.depends_on.keys().cloned().collect();

        let feature = ResolvedFeature {
            id: reference.to_string(),
            source,
            version,
            digest,
            integrity,
            metadata,
            options,
            install_root,
            depends_on,
        };
        self.memo.insert(key, feature.clone());
        Ok(feature)
    }

    fn fetch_local(
        &self,
        path: &Path,
    ) -> Result<(PathBuf, Option<String>, String, Option<String>)> {
        let dir = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        };
        let manifest = dir.join("devcontainer-feature.json");
        let bytes = std::fs::read(&manifest).map_err(|e| {
            DcxError::Feature(FeatureError::Fetch {
                id: path.display().to_string(),
                message: format!("cannot read {}: {}", manifest.display(), e),
            })
        })?;
        Ok((dir, None, sha256_hex(&bytes), None))
    }

    async fn fetch_tarball(
        &self,
        url: &str,
        opts: ResolveOptions,
    ) -> Result<(PathBuf, Option<String>, String, Option<String>)> {
        let slot = self.cache_slot(url);
        if !opts.force_pull {
            if let Some(cached) = read_cache_slot(&slot) {
                debug!(url = %url, "Using cached feature archive");
                return Ok(cached);
            }
        }

        let fetch_err = |message: String| {
            DcxError::Feature(FeatureError::Fetch {
                id: url.to_string(),
                message,
            })
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        let integrity = sha256_hex(&bytes);

        extract_archive(&bytes, &slot).map_err(|e| fetch_err(e))?;
        write_cache_meta(
            &slot,
            &FetchMeta {
                digest: None,
                integrity: integrity.clone(),
                version: None,
            },
        );
        Ok((slot, None, integrity, None))
    }

    async fn fetch_oci(
        &self,
        oci: &OciFeatureRef,
        opts: ResolveOptions,
    ) -> Result<(PathBuf, Option<String>, String, Option<String>)> {
        let slot = self.cache_slot(&oci.to_string());
        if !opts.force_pull {
            if let Some(cached) = read_cache_slot(&slot) {
                debug!(reference = %oci, "Using cached feature archive");
                return Ok(cached);
            }
        }

        let fetch_err = |message: String| {
            DcxError::Feature(FeatureError::Fetch {
                id: oci.to_string(),
                message,
            })
        };

        let manifest_url = format!(
            "https://{}/v2/{}/manifests/{}",
            oci.registry, oci.repository, oci.version
        );
        let (manifest_bytes, digest, token) = self
            .registry_get(&manifest_url, oci, None)
            .await
            .map_err(|e| fetch_err(e))?;
        let digest =
            digest.unwrap_or_else(|| format!("sha256:{}", sha256_hex(&manifest_bytes)));

        let manifest: serde_json::Value =
            serde_json::from_slice(&manifest_bytes).map_err(|e| fetch_err(e.to_string()))?;
        let layer_digest = manifest
            .get("layers")
            .and_then(|l| l.as_array())
            .and_then(|l| l.first())
            .and_then(|l| l.get("digest"))
            .and_then(|d| d.as_str())
            .ok_or_else(|| fetch_err("manifest has no layers".to_string()))?
            .to_string();
        let annotation_version = manifest
            .get("annotations")
            .and_then(|a| a.get("org.opencontainers.image.version"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let blob_url = format!(
            "https://{}/v2/{}/blobs/{}",
            oci.registry, oci.repository, layer_digest
        );
        let (layer_bytes, _, _) = self
            .registry_get(&blob_url, oci, token)
            .await
            .map_err(|e| fetch_err(e))?;
        let integrity = sha256_hex(&layer_bytes);

        extract_archive(&layer_bytes, &slot).map_err(|e| fetch_err(e))?;
        write_cache_meta(
            &slot,
            &FetchMeta {
                digest: Some(digest.clone()),
                integrity: integrity.clone(),
                version: annotation_version.clone(),
            },
        );
        Ok((slot, Some(digest), integrity, annotation_version))
    }

    /// GET against a registry, following the anonymous Bearer token dance on
    /// a 401. Returns (body, content digest header, token for reuse).
    async fn registry_get(
        &self,
        url: &str,
        oci: &OciFeatureRef,
        token: Option<String>,
    ) -> std::result::Result<(Vec<u8>, Option<String>, Option<String>), String> {
        const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
             application/vnd.docker.distribution.manifest.v2+json";

        let mut request = self.http.get(url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED && token.is_none() {
            let challenge = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .ok_or("401 without WWW-Authenticate")?
                .to_string();
            let token = self.anonymous_token(&challenge, oci).await?;
            let response = self
                .http
                .get(url)
                .header("Accept", MANIFEST_ACCEPT)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if !response.status().is_success() {
                return Err(format!("HTTP {}", response.status()));
            }
            let digest = header_string(&response, "docker-content-digest");
            let body = response.bytes().await.map_err(|e| e.to_string())?;
            return Ok((body.to_vec(), digest, Some(token)));
        }

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let digest = header_string(&response, "docker-content-digest");
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok((body.to_vec(), digest, token))
    }

    async fn anonymous_token(
        &self,
        challenge: &str,
        oci: &OciFeatureRef,
    ) -> std::result::Result<String, String> {
        let mut realm = None;
        let mut service = None;
        for part in challenge.trim_start_matches("Bearer ").split(',') {
            if let Some((key, value)) = part.split_once('=') {
                let value = value.trim_matches('"').to_string();
                match key.trim() {
                    "realm" => realm = Some(value),
                    "service" => service = Some(value),
                    _ => {}
                }
            }
        }
        let realm = realm.ok_or("challenge without realm")?;
        let mut request = self.http.get(&realm).query(&[(
            "scope",
            format!("repository:{}:pull", oci.repository),
        )]);
        if let Some(service) = service {
            request = request.query(&[("service", service)]);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        body.get("token")
            .or_else(|| body.get("access_token"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| "token endpoint returned no token".to_string())
    }

    fn cache_slot(&self, key: &str) -> PathBuf {
        self.cache_dir.join(&sha256_hex(key.as_bytes())[..16])
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn short_name(source: &FeatureSource) -> &str {
    match source {
        FeatureSource::Oci(oci) => oci.name(),
        FeatureSource::Local(path) => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default(),
        FeatureSource::Tarball(url) => url.rsplit('/').next().unwrap_or_default(),
    }
}

/// Extract a tar (optionally gzipped) archive into `dest`, replacing it.
fn extract_archive(bytes: &[u8], dest: &Path) -> std::result::Result<(), String> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| e.to_string())?;
    }
    std::fs::create_dir_all(dest).map_err(|e| e.to_string())?;

    let gzipped = bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b;
    let result = if gzipped {
        tar::Archive::new(GzDecoder::new(bytes)).unpack(dest)
    } else {
        tar::Archive::new(bytes).unpack(dest)
    };
    result.map_err(|e| format!("archive extraction failed: {}", e))
}

fn read_cache_slot(slot: &Path) -> Option<(PathBuf, Option<String>, String, Option<String>)> {
    let meta_path = slot.join(".dcx-fetch.json");
    let raw = std::fs::read_to_string(meta_path).ok()?;
    let meta: FetchMeta = serde_json::from_str(&raw).ok()?;
    Some((slot.to_path_buf(), meta.digest, meta.integrity, meta.version))
}

fn write_cache_meta(slot: &Path, meta: &FetchMeta) {
    let raw = match serde_json::to_string_pretty(meta) {
        Ok(raw) => raw,
        Err(_) => return,
    };
    if let Err(e) = std::fs::write(slot.join(".dcx-fetch.json"), raw) {
        warn!(slot = %slot.display(), error = %e, "Could not record fetch metadata");
    }
}

/// Verify every non-local resolved feature against the lockfile.
fn verify_frozen<'a>(
    lockfile: Option<&Lockfile>,
    features: impl Iterator<Item = &'a ResolvedFeature>,
) -> Result<()> {
    let Some(lockfile) = lockfile else {
        return Err(DcxError::Feature(FeatureError::LockfileMismatch {
            message: "frozen mode requires a lockfile; run `dcx lock` first".to_string(),
        }));
    };
    for feature in features {
        if feature.source.is_local() {
            continue;
        }
        let Some(entry) = lockfile.features.get(&feature.id) else {
            return Err(DcxError::Feature(FeatureError::LockfileMismatch {
                message: format!("feature '{}' is not in the lockfile", feature.id),
            }));
        };
        if entry.integrity != feature.integrity {
            return Err(DcxError::Feature(FeatureError::LockfileMismatch {
                message: format!(
                    "feature '{}' integrity changed (locked {}, fetched {})",
                    feature.id, entry.integrity, feature.integrity
                ),
            }));
        }
    }
    Ok(())
}

/// A feature as seen by the ordering pass
#[derive(Debug, Clone)]
pub struct OrderNode {
    pub id: String,
    /// Short name used to match `installsAfter` hints
    pub short_name: String,
    pub depends_on: Vec<String>,
    pub installs_after: Vec<String>,
}

/// Compute the install order over the resolved set.
///
/// See the module docs for the rule priority. The returned order is a linear
/// extension of `dependsOn`; with an override it equals the override exactly.
pub fn compute_install_order(
    nodes: &[OrderNode],
    override_order: Option<&[String]>,
) -> Result<Vec<String>> {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let by_id: HashMap<&str, &OrderNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    // Hard edges: dependency -> dependent. A dependsOn entry naming a feature
    // outside the resolved set is a metadata error surfaced during closure,
    // so unknown ids are ignored here.
    detect_cycles(nodes)?;

    if let Some(explicit) = override_order {
        return validate_override(nodes, &ids, explicit);
    }

    // Kahn's algorithm over hard edges, soft hints and lexicographic id as
    // tie-breakers.
    let mut remaining_deps: HashMap<&str, HashSet<&str>> = nodes
        .iter()
        .map(|n| {
            (
                n.id.as_str(),
                n.depends_on
                    .iter()
                    .map(String::as_str)
                    .filter(|d| ids.contains(d))
                    .collect(),
            )
        })
        .collect();

    let mut emitted: Vec<String> = Vec::with_capacity(nodes.len());
    let mut emitted_set: HashSet<String> = HashSet::new();

    while emitted.len() < nodes.len() {
        let mut ready: Vec<&str> = remaining_deps
            .iter()
            .filter(|(id, deps)| !emitted_set.contains(**id) && deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();
        if ready.is_empty() {
            return Err(DcxError::internal(
                "feature graph exhausted without completing the order",
            ));
        }

        // Prefer a ready feature whose installsAfter hints are all satisfied.
        let hints_satisfied = |id: &str| -> bool {
            by_id[id].installs_after.iter().all(|hint| {
                let present = nodes
                    .iter()
                    .find(|n| &n.id == hint || &n.short_name == hint);
                match present {
                    Some(node) => emitted_set.contains(&node.id),
                    None => true, // hint names a feature we are not installing
                }
            })
        };
        let chosen = ready
            .iter()
            .copied()
            .find(|&id| hints_satisfied(id))
            .unwrap_or(ready[0]);

        emitted.push(chosen.to_string());
        emitted_set.insert(chosen.to_string());
        for deps in remaining_deps.values_mut() {
            deps.remove(chosen);
        }
        remaining_deps.remove(chosen);
    }

    Ok(emitted)
}

/// Detect dependency cycles with DFS coloring; the error names the cycle.
fn detect_cycles(nodes: &[OrderNode]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let by_id: HashMap<&str, &OrderNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut color: HashMap<&str, Color> = ids.iter().map(|id| (*id, Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a OrderNode>,
        ids: &HashSet<&'a str>,
        color: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> std::result::Result<(), Vec<String>> {
        color.insert(id, Color::Gray);
        stack.push(id);
        for dep in &by_id[id].depends_on {
            let dep = dep.as_str();
            if !ids.contains(dep) {
                continue;
            }
            match color[dep] {
                Color::Gray => {
                    // Back edge: the gray suffix of the stack is the cycle.
                    let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                    let mut chain: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    chain.push(dep.to_string());
                    return Err(chain);
                }
                Color::White => visit(dep, by_id, ids, color, stack)?,
                Color::Black => {}
            }
        }
        stack.pop();
        color.insert(id, Color::Black);
        Ok(())
    }

    let mut ordered_ids: Vec<&str> = ids.iter().copied().collect();
    ordered_ids.sort_unstable();
    for id in ordered_ids {
        if color[id] == Color::White {
            let mut stack = Vec::new();
            if let Err(chain) = visit(id, &by_id, &ids, &mut color, &mut stack) {
                return Err(DcxError::Feature(FeatureError::DependencyCycle { chain }));
            }
        }
    }
    Ok(())
}

/// Validate an explicit override order: a permutation of the resolved set
/// that respects every hard dependency.
fn validate_override(
    nodes: &[OrderNode],
    ids: &HashSet<&str>,
    explicit: &[String],
) -> Result<Vec<String>> {
    let explicit_set: HashSet<&str> = explicit.iter().map(String::as_str).collect();
    if explicit.len() != explicit_set.len() {
        return Err(DcxError::Feature(FeatureError::InvalidInstallOrder {
            message: "override list contains duplicates".to_string(),
        }));
    }
    for id in explicit {
        if !ids.contains(id.as_str()) {
            return Err(DcxError::Feature(FeatureError::InvalidInstallOrder {
                message: format!("override names unknown feature '{}'", id),
            }));
        }
    }
    for id in ids {
        if !explicit_set.contains(id) {
            return Err(DcxError::Feature(FeatureError::InvalidInstallOrder {
                message: format!("override is missing feature '{}'", id),
            }));
        }
    }

    let position: HashMap<&str, usize> = explicit
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    for node in nodes {
        for dep in &node.depends_on {
            if let (Some(&dep_pos), Some(&node_pos)) =
                (position.get(dep.as_str()), position.get(node.id.as_str()))
            {
                if dep_pos > node_pos {
                    return Err(DcxError::Feature(FeatureError::InvalidInstallOrder {
                        message: format!(
                            "override places '{}' before its dependency '{}'",
                            node.id, dep
                        ),
                    }));
                }
            }
        }
    }

    Ok(explicit.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, depends_on: &[&str], installs_after: &[&str]) -> OrderNode {
        OrderNode {
            id: id.to_string(),
            short_name: id.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            installs_after: installs_after.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn dependencies_install_first() {
        let nodes = vec![node("a", &["b"], &[]), node("b", &[], &[])];
        assert_eq!(compute_install_order(&nodes, None).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn lexicographic_tie_break() {
        let nodes = vec![node("zeta", &[], &[]), node("alpha", &[], &[])];
        assert_eq!(
            compute_install_order(&nodes, None).unwrap(),
            vec!["alpha", "zeta"]
        );
    }

    #[test]
    fn installs_after_breaks_ties_when_possible() {
        let nodes = vec![node("a", &[], &["b"]), node("b", &[], &[])];
        assert_eq!(compute_install_order(&nodes, None).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn installs_after_yields_to_hard_order() {
        // b depends on a, but a hints it installs after b: the hard edge wins.
        let nodes = vec![node("a", &[], &["b"]), node("b", &["a"], &[])];
        assert_eq!(compute_install_order(&nodes, None).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn installs_after_hint_for_absent_feature_is_ignored() {
        let nodes = vec![node("a", &[], &["missing"]), node("b", &[], &[])];
        assert_eq!(compute_install_order(&nodes, None).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn cycle_of_two_names_both_features() {
        let nodes = vec![node("a", &["b"], &[]), node("b", &["a"], &[])];
        let err = compute_install_order(&nodes, None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains('a') && message.contains('b'), "{}", message);
        assert!(matches!(
            err,
            DcxError::Feature(FeatureError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let nodes = vec![node("a", &["a"], &[])];
        assert!(compute_install_order(&nodes, None).is_err());
    }

    #[test]
    fn override_is_authoritative_when_valid() {
        let nodes = vec![
            node("a", &[], &[]),
            node("b", &[], &[]),
            node("c", &[], &[]),
        ];
        let explicit = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(
            compute_install_order(&nodes, Some(&explicit)).unwrap(),
            explicit
        );
    }

    #[test]
    fn override_violating_dependencies_fails() {
        let nodes = vec![node("a", &["b"], &[]), node("b", &[], &[])];
        let explicit = vec!["a".to_string(), "b".to_string()];
        let err = compute_install_order(&nodes, Some(&explicit)).unwrap_err();
        assert!(matches!(
            err,
            DcxError::Feature(FeatureError::InvalidInstallOrder { .. })
        ));
    }

    #[test]
    fn override_must_cover_the_resolved_set() {
        let nodes = vec![node("a", &[], &[]), node("b", &[], &[])];
        let missing = vec!["a".to_string()];
        assert!(compute_install_order(&nodes, Some(&missing)).is_err());
        let unknown = vec!["a".to_string(), "b".to_string(), "x".to_string()];
        assert!(compute_install_order(&nodes, Some(&unknown)).is_err());
    }

    #[test]
    fn order_is_a_linear_extension_of_depends_on() {
        let nodes = vec![
            node("app", &["runtime", "tools"], &[]),
            node("runtime", &["base"], &[]),
            node("tools", &["base"], &[]),
            node("base", &[], &[]),
        ];
        let order = compute_install_order(&nodes, None).unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("base") < pos("runtime"));
        assert!(pos("base") < pos("tools"));
        assert!(pos("runtime") < pos("app"));
        assert!(pos("tools") < pos("app"));
    }

    #[tokio::test]
    async fn resolves_local_features_and_their_dependencies() {
        let tmp = tempfile::TempDir::new().unwrap();
        let write_feature = |name: &str, body: &str| {
            let dir = tmp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("devcontainer-feature.json"), body).unwrap();
        };
        write_feature(
            "top",
            r#"{"id": "top", "version": "1.0.0", "dependsOn": {"./base": {}}}"#,
        );
        write_feature("base", r#"{"id": "base", "version": "0.2.0"}"#);

        let mut resolver = FeatureResolver::new(tmp.path())
            .with_cache_dir(tmp.path().join("cache"));
        let mut features = IndexMap::new();
        features.insert("./top".to_string(), serde_json::json!({}));
        let resolved = resolver
            .resolve(&features, None, None, ResolveOptions::default())
            .await
            .unwrap();

        let ids: Vec<&str> = resolved.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["./base", "./top"]);
        assert!(resolved.iter().all(|f| !f.integrity.is_empty()));
    }

    fn feature_tarball(id: &str) -> Vec<u8> {
        let encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let json = format!(r#"{{"id": "{}", "version": "1.0.0"}}"#, id);
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        builder
            .append_data(
                &mut header,
                "devcontainer-feature.json",
                json.as_bytes(),
            )
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn fetches_tarball_features_over_http() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/node.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(feature_tarball("node")))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let mut resolver = FeatureResolver::new(tmp.path())
            .with_cache_dir(tmp.path().join("cache"));
        let url = format!("{}/node.tgz", server.uri());
        let mut features = IndexMap::new();
        features.insert(url.clone(), serde_json::json!({}));

        let resolved = resolver
            .resolve(&features, None, None, ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].metadata.id, "node");
        assert!(resolved[0].digest.is_none());
        assert_eq!(resolved[0].integrity.len(), 64);
        assert!(resolved[0].install_root.join("devcontainer-feature.json").exists());
    }

    #[tokio::test]
    async fn tarball_fetch_http_error_names_the_source() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.tgz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let mut resolver = FeatureResolver::new(tmp.path())
            .with_cache_dir(tmp.path().join("cache"));
        let url = format!("{}/gone.tgz", server.uri());
        let mut features = IndexMap::new();
        features.insert(url.clone(), serde_json::json!({}));

        let err = resolver
            .resolve(&features, None, None, ResolveOptions::default())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gone.tgz"), "{}", message);
        assert!(message.contains("404"), "{}", message);
    }

    #[tokio::test]
    async fn frozen_without_lockfile_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("f");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("devcontainer-feature.json"),
            r#"{"id": "f", "version": "1.0.0"}"#,
        )
        .unwrap();

        let mut resolver = FeatureResolver::new(tmp.path())
            .with_cache_dir(tmp.path().join("cache"));
        let mut features = IndexMap::new();
        features.insert("./f".to_string(), serde_json::json!(true));
        // Frozen mode requires a lockfile to exist at all.
        assert!(resolver
            .resolve(
                &features,
                None,
                None,
                ResolveOptions {
                    frozen: true,
                    force_pull: false
                },
            )
            .await
            .is_err());
    }
}
