//! `dcx up`: reconcile the workspace to RUNNING.
//!
//! Control flow: identity and hashes are loaded by the shared context, the
//! state manager reports the observed state, the reconciler picks an action,
//! and the chosen action drives (optionally) the feature resolver and image
//! builders before the container is created, started, and walked through its
//! lifecycle hooks.

use anyhow::{bail, Context as _, Result};
use dcx_core::agent::{host_agent_available, AgentForwardSession, SSH_AUTH_SOCK};
use dcx_core::builder::{BuildOptions, DerivedImageBuilder};
use dcx_core::compose::{ComposeProject, ComposeRunner};
use dcx_core::config::BuildPlan;
use dcx_core::feature_resolver::{FeatureResolver, ResolveOptions};
use dcx_core::features::{FeatureRequirements, ResolvedFeature};
use dcx_core::hashing::dockerfile_image_tag;
use dcx_core::labels::BuildMethod;
use dcx_core::lifecycle::LifecycleRunner;
use dcx_core::lockfile::{lockfile_path, read_lockfile};
use dcx_core::reconcile::{decide, Action, ReconcileFlags};
use dcx_core::runtime_opts::synthesize;
use dcx_core::ssh::ssh_config_stanza;
use dcx_core::state::Observation;
use std::path::Path;
use tracing::{info, warn};

use super::context::CommandContext;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpArgs {
    pub recreate: bool,
    pub rebuild: bool,
    pub pull: bool,
    pub no_agent: bool,
    pub ssh: bool,
}

pub async fn execute(workspace: Option<&Path>, args: UpArgs) -> Result<i32> {
    let mut ctx = CommandContext::load(workspace)?;

    if ctx.config.uses_compose() {
        compose_up(&ctx, &args).await?;
    } else {
        container_up(&mut ctx, &args).await?;
    }

    let want_ssh = args.ssh || ctx.sidecar.as_ref().map(|s| s.up.ssh).unwrap_or(false);
    if want_ssh {
        println!("{}", ssh_config_stanza(&ctx.identity));
        println!("# Add the stanza above to ~/.ssh/config, then: ssh {}", ctx.identity.ssh_host());
    }
    Ok(0)
}

async fn container_up(ctx: &mut CommandContext, args: &UpArgs) -> Result<()> {
    let observation = ctx.observe().await?;
    let flags = ReconcileFlags {
        recreate: args.recreate,
        rebuild: args.rebuild,
        pull: args.pull,
    };
    let action = decide(observation.state, flags);
    info!(state = %observation.state, action = %action, "Reconciled workspace state");

    match action {
        Action::None => {
            println!("Container is running and current; nothing to do.");
            Ok(())
        }
        Action::Start => {
            let container = observation
                .container
                .as_ref()
                .context("start action without an observed container")?;
            ctx.engine.start(&container.id).await?;
            run_post_start(ctx, &container.id, args).await
        }
        Action::Create => create_and_start(ctx, args, args.rebuild).await,
        Action::Recreate => {
            remove_existing(ctx, &observation).await?;
            create_and_start(ctx, args, args.rebuild).await
        }
        Action::Rebuild => {
            remove_existing(ctx, &observation).await?;
            create_and_start(ctx, args, true).await
        }
    }
}

/// Stop and remove whatever the observation found (or, for broken states
/// where nothing was identified, the deterministically named container).
async fn remove_existing(ctx: &CommandContext, observation: &Observation) -> Result<()> {
    if let Some(container) = &observation.container {
        info!(container = %container.name, "Removing existing container");
        ctx.engine.remove(&container.id, true, false).await?;
    } else {
        let name = ctx.identity.container_name();
        if ctx.engine.remove(&name, true, false).await.is_err() {
            // Nothing under the expected name either; nothing to remove.
        }
    }
    for secondary in &observation.secondaries {
        ctx.engine.remove(&secondary.id, true, false).await?;
    }
    Ok(())
}

async fn create_and_start(ctx: &mut CommandContext, args: &UpArgs, rebuild: bool) -> Result<()> {
    let plan = ctx.config.build_plan()?;
    let base_image = resolve_base_image(ctx, &plan, args, rebuild).await?;

    // Features: resolve, pin, and fold into the overall hash.
    let features = resolve_features(ctx, args).await?;
    let pins: Vec<(String, String)> = features
        .iter()
        .map(|f| (f.id.clone(), f.pin().to_string()))
        .collect();
    ctx.hashes = ctx.hashes.clone().with_features(&pins);

    let builder = DerivedImageBuilder::new(&ctx.engine);
    let image = builder
        .build(
            &base_image,
            &features,
            ctx.config.remote_user.as_deref(),
            &ctx.identity,
            BuildOptions {
                rebuild,
                pull: args.pull,
            },
        )
        .await?;

    let requirements = FeatureRequirements::collect(&features);
    if !requirements.privileged_features.is_empty() {
        warn!(
            features = ?requirements.privileged_features,
            "Features require a privileged container"
        );
    }

    let labels = ctx.label_set(ctx.build_method()?, "");
    let opts = synthesize(&ctx.config, &ctx.identity, &image, &requirements, &labels);
    let id = ctx.engine.create(&opts).await?;
    info!(container = %opts.name, id = %id, "Created container");
    ctx.engine.start(&id).await?;

    run_create_hooks(ctx, &id, args).await?;
    println!("Container {} is up.", opts.name);
    Ok(())
}

async fn resolve_base_image(
    ctx: &CommandContext,
    plan: &BuildPlan,
    args: &UpArgs,
    rebuild: bool,
) -> Result<String> {
    match plan {
        BuildPlan::Image(image) => {
            if args.pull || !ctx.engine.image_exists(image).await? {
                ctx.engine.pull(image).await?;
            }
            Ok(image.clone())
        }
        BuildPlan::Dockerfile(build) => {
            let tag = dockerfile_image_tag(&ctx.identity.workspace_id, &ctx.hashes);
            if rebuild || args.pull || !ctx.engine.image_exists(&tag).await? {
                let context_dir = ctx
                    .workspace
                    .join(build.context.as_deref().unwrap_or("."));
                let dockerfile = ctx
                    .workspace
                    .join(build.dockerfile.as_deref().unwrap_or("Dockerfile"));
                let build_args: Vec<(String, String)> = build
                    .args
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                ctx.engine
                    .build(
                        &context_dir,
                        &dockerfile,
                        &tag,
                        &build_args,
                        build.target.as_deref(),
                        &build.cache_from,
                        args.pull,
                    )
                    .await?;
            }
            Ok(tag)
        }
        BuildPlan::Compose { .. } => {
            bail!("compose plans do not resolve a single base image")
        }
    }
}

async fn resolve_features(ctx: &CommandContext, args: &UpArgs) -> Result<Vec<ResolvedFeature>> {
    if ctx.config.features.is_empty() {
        return Ok(Vec::new());
    }
    let config_dir = ctx
        .config_path
        .parent()
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let lockfile = read_lockfile(&lockfile_path(&ctx.config_path))?;
    let mut resolver = FeatureResolver::new(&config_dir);
    let features = resolver
        .resolve(
            &ctx.config.features,
            ctx.config.override_feature_install_order.as_deref(),
            lockfile.as_ref(),
            ResolveOptions {
                force_pull: args.pull,
                frozen: false,
            },
        )
        .await?;

    // A present lockfile is verified even outside frozen mode; drift is a
    // warning here and an error only under `lock --frozen`.
    if let Some(lockfile) = &lockfile {
        for mismatch in lockfile.verify(&features) {
            warn!(mismatch = %mismatch, "Lockfile drift");
        }
    }
    Ok(features)
}

/// Run the create-time hook sequence, with agent forwarding when available.
async fn run_create_hooks(ctx: &CommandContext, container_id: &str, args: &UpArgs) -> Result<()> {
    let hooks = ctx.hooks()?;
    let mut lifecycle_ctx = ctx.lifecycle_context(container_id);
    let forwarding = establish_forwarding(ctx, container_id, args).await;
    if let Some(session) = &forwarding {
        lifecycle_ctx.env.push((
            SSH_AUTH_SOCK.to_string(),
            session.container_socket().to_string(),
        ));
    }

    let runner = LifecycleRunner::new(&ctx.engine);
    let result = runner.run_create_sequence(&hooks, &lifecycle_ctx).await;

    if let Some(session) = forwarding {
        session.teardown().await;
    }
    Ok(result?)
}

/// Post-start hooks for an existing container; a missing post-create
/// sentinel means creation was interrupted, so the create hooks re-run.
async fn run_post_start(ctx: &CommandContext, container_id: &str, args: &UpArgs) -> Result<()> {
    let hooks = ctx.hooks()?;
    let mut lifecycle_ctx = ctx.lifecycle_context(container_id);
    let forwarding = establish_forwarding(ctx, container_id, args).await;
    if let Some(session) = &forwarding {
        lifecycle_ctx.env.push((
            SSH_AUTH_SOCK.to_string(),
            session.container_socket().to_string(),
        ));
    }

    let runner = LifecycleRunner::new(&ctx.engine);
    let result = if runner.sentinel_present(container_id).await? {
        runner.run_start_sequence(&hooks, &lifecycle_ctx).await
    } else {
        info!("Create-time hooks did not complete previously; re-running them");
        runner.run_create_sequence(&hooks, &lifecycle_ctx).await
    };

    if let Some(session) = forwarding {
        session.teardown().await;
    }
    result?;
    println!("Container started.");
    Ok(())
}

async fn establish_forwarding(
    ctx: &CommandContext,
    container_id: &str,
    args: &UpArgs,
) -> Option<AgentForwardSession> {
    let disabled = args.no_agent || ctx.default_no_agent();
    if disabled || !host_agent_available() {
        return None;
    }
    match AgentForwardSession::establish(
        &ctx.engine,
        container_id,
        ctx.config.effective_user(),
    )
    .await
    {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "Agent forwarding unavailable for lifecycle hooks");
            None
        }
    }
}

async fn compose_up(ctx: &CommandContext, args: &UpArgs) -> Result<()> {
    let project = ComposeProject::from_config(&ctx.config, &ctx.identity)?;
    let observation = ctx.observe().await?;
    let flags = ReconcileFlags {
        recreate: args.recreate,
        rebuild: args.rebuild,
        pull: args.pull,
    };
    let action = decide(observation.state, flags);
    info!(state = %observation.state, action = %action, project = %project.name, "Reconciled compose state");

    let runner = ComposeRunner::new(&ctx.engine);
    let hooks = ctx.hooks()?;

    match action {
        Action::None => {
            println!("Compose project is running and current; nothing to do.");
            return Ok(());
        }
        Action::Start => {
            runner.start(&project).await?;
            let primary = require_primary(&runner, &project).await?;
            let lifecycle_ctx = ctx.lifecycle_context(&primary);
            LifecycleRunner::new(&ctx.engine)
                .run_start_sequence(&hooks, &lifecycle_ctx)
                .await?;
            println!("Compose project started.");
            return Ok(());
        }
        Action::Recreate | Action::Rebuild => {
            runner.down(&project, false, false).await?;
        }
        Action::Create => {}
    }

    // initializeCommand runs on the host before the composition comes up.
    let host_ctx = ctx.lifecycle_context("");
    let lifecycle_runner = LifecycleRunner::new(&ctx.engine);
    lifecycle_runner.run_initialize(&hooks, &host_ctx).await?;

    let scratch = tempfile::Builder::new().prefix("dcx-compose-").tempdir()?;
    let labels = ctx.label_set(BuildMethod::Compose, &project.name);
    let override_file = project.write_override_file(scratch.path(), &labels)?;
    runner
        .up(&project, &override_file, args.rebuild || args.pull)
        .await?;

    let primary = require_primary(&runner, &project).await?;
    let mut container_hooks = hooks.clone();
    container_hooks.initialize = None;
    let lifecycle_ctx = ctx.lifecycle_context(&primary);
    lifecycle_runner
        .run_create_sequence(&container_hooks, &lifecycle_ctx)
        .await?;

    println!("Compose project {} is up.", project.name);
    Ok(())
}

async fn require_primary(runner: &ComposeRunner<'_>, project: &ComposeProject) -> Result<String> {
    runner
        .service_container_id(project, &project.service)
        .await?
        .with_context(|| {
            format!(
                "compose service '{}' has no container after up",
                project.service
            )
        })
}

/// Shared by `restart`: bring the workspace up with specific flags.
pub async fn up_for_restart(workspace: Option<&Path>, rebuild: bool) -> Result<i32> {
    execute(
        workspace,
        UpArgs {
            rebuild,
            ..Default::default()
        },
    )
    .await
}
