//! Derived-image builder
//!
//! Applies an ordered feature list on top of a base image by synthesizing a
//! single build context: one layer per feature that copies the feature's
//! install tree to a stable path, exports its options as environment
//! variables, and runs its install entrypoint. The result is tagged
//! per-workspace and the build is skipped entirely when an image with the
//! same features hash already exists.

use crate::engine::Engine;
use crate::errors::Result;
use crate::features::ResolvedFeature;
use crate::hashing::{derived_image_tag, sha256_hex};
use crate::identity::WorkspaceIdentity;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Image label recording the features hash the image was built from
pub const FEATURES_HASH_LABEL: &str = "io.dcx.features-hash";

/// In-container root for copied feature install trees
pub const FEATURES_INSTALL_ROOT: &str = "/opt/dcx/features";

/// Build knobs threaded from the CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Force the build even when the tag is current
    pub rebuild: bool,
    /// Pull the base image during the build
    pub pull: bool,
}

/// Builds per-workspace derived images
pub struct DerivedImageBuilder<'a> {
    engine: &'a Engine,
}

impl<'a> DerivedImageBuilder<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Build (or reuse) the derived image; returns its tag.
    ///
    /// Idempotent: for the same (base image, ordered feature digests, remote
    /// user) the tag is unchanged and a second build is a no-op.
    #[instrument(skip_all, fields(base = %base_image, features = features.len()))]
    pub async fn build(
        &self,
        base_image: &str,
        features: &[ResolvedFeature],
        remote_user: Option<&str>,
        identity: &WorkspaceIdentity,
        opts: BuildOptions,
    ) -> Result<String> {
        if features.is_empty() {
            // No derived image: the base is used as-is.
            return Ok(base_image.to_string());
        }

        let tag = derived_image_tag(identity.short_id());
        let features_hash = features_hash(base_image, features, remote_user);

        if !opts.rebuild && !opts.pull {
            if let Some(existing) = self.engine.image_label(&tag, FEATURES_HASH_LABEL).await? {
                if existing == features_hash {
                    debug!(tag = %tag, "Derived image is current, skipping build");
                    return Ok(tag);
                }
            }
        }

        // Scratch context, removed on drop regardless of build outcome.
        let scratch = tempfile::Builder::new().prefix("dcx-build-").tempdir()?;
        let dockerfile_path = scratch.path().join("Dockerfile");
        let dockerfile = self.stage_context(scratch.path(), base_image, features, remote_user)?;
        std::fs::write(&dockerfile_path, dockerfile)?;

        info!(tag = %tag, "Building derived image");
        self.engine
            .build(
                scratch.path(),
                &dockerfile_path,
                &tag,
                &[("DCX_FEATURES_HASH".to_string(), features_hash)],
                None,
                &[],
                opts.pull,
            )
            .await?;
        Ok(tag)
    }

    /// Copy feature trees into the scratch directory and synthesize the
    /// Dockerfile text.
    fn stage_context(
        &self,
        scratch: &Path,
        base_image: &str,
        features: &[ResolvedFeature],
        remote_user: Option<&str>,
    ) -> Result<String> {
        let mut dockerfile = String::new();
        writeln!(dockerfile, "FROM {}", base_image).ok();
        writeln!(dockerfile, "ARG DCX_FEATURES_HASH").ok();
        writeln!(
            dockerfile,
            "LABEL {}=\"${{DCX_FEATURES_HASH}}\"",
            FEATURES_HASH_LABEL
        )
        .ok();
        writeln!(dockerfile, "USER root").ok();

        let install_user = remote_user.unwrap_or("root");
        for (index, feature) in features.iter().enumerate() {
            let layer_name = format!("{:02}-{}", index, sanitize_layer_name(&feature.id));
            let local_dir = scratch.join("features").join(&layer_name);
            copy_tree(&feature.install_root, &local_dir)?;

            let target = format!("{}/{}", FEATURES_INSTALL_ROOT, layer_name);
            writeln!(dockerfile).ok();
            writeln!(dockerfile, "# {}", feature.display_name()).ok();
            writeln!(dockerfile, "COPY features/{}/ {}/", layer_name, target).ok();
            for (key, value) in feature.option_env() {
                writeln!(dockerfile, "ENV {}={}", key, shell_quote(&value)).ok();
            }
            for (key, value) in &feature.metadata.container_env {
                writeln!(dockerfile, "ENV {}={}", key, shell_quote(value)).ok();
            }
            if install_user != "root" {
                writeln!(dockerfile, "USER {}", install_user).ok();
            }
            writeln!(
                dockerfile,
                "RUN cd {} && chmod +x ./{} && ./{}",
                target,
                feature.metadata.install_entrypoint(),
                feature.metadata.install_entrypoint()
            )
            .ok();
            if install_user != "root" {
                writeln!(dockerfile, "USER root").ok();
            }
        }

        Ok(dockerfile)
    }
}

/// Hash identifying the derived image contents: base, ordered feature pins,
/// and the install user.
pub fn features_hash(
    base_image: &str,
    features: &[ResolvedFeature],
    remote_user: Option<&str>,
) -> String {
    let mut material = String::new();
    material.push_str(base_image);
    material.push('\n');
    material.push_str(remote_user.unwrap_or("root"));
    for feature in features {
        material.push('\n');
        material.push_str(&feature.id);
        material.push('=');
        material.push_str(feature.pin());
    }
    sha256_hex(material.as_bytes())
}

fn sanitize_layer_name(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn shell_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
