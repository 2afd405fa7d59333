/// Launch plan assembly: classpath, argument vectors, credentials
use crate::error::LaunchError;
use crate::game::descriptor::VersionDescriptor;
use crate::game::launcher::arguments::{
    flatten_arguments, substitute_all, tokenize_legacy,
};
use crate::game::launcher::classpath::{classpath_entries, join_classpath};
use crate::game::launcher::java::resolve_runtime;
use crate::game::rules::PlatformContext;
use crate::layout::DataLayout;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const LAUNCHER_NAME: &str = "Lodestone";
pub const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMode {
    Online,
    Offline,
}

/// An opaque credential. How it was obtained (MSA flow, token cache, plain
/// offline name) is somebody else's business; the planner only consumes it.
#[derive(Debug, Clone)]
pub struct AccountCredential {
    pub mode: AccountMode,
    pub username: String,
    pub uuid: String,
    pub access_token: String,
    pub user_type: String,
    pub xuid: Option<String>,
}

impl AccountCredential {
    /// Offline-mode credential: token `"0"`, UUID derived deterministically
    /// from the username so worlds and skins stay stable across launches.
    pub fn offline(username: &str) -> Self {
        Self {
            mode: AccountMode::Offline,
            username: username.to_string(),
            uuid: offline_uuid(username),
            access_token: "0".to_string(),
            user_type: "legacy".to_string(),
            xuid: None,
        }
    }
}

/// Stable hash of `OfflinePlayer:<name>`, rendered without dashes.
pub fn offline_uuid(username: &str) -> String {
    Uuid::new_v3(
        &Uuid::NAMESPACE_OID,
        format!("OfflinePlayer:{}", username).as_bytes(),
    )
    .simple()
    .to_string()
}

/// Source of credentials, kept abstract so authentication internals stay
/// out of the core.
pub trait AccountProvider {
    fn credential(&self) -> anyhow::Result<AccountCredential>;
}

pub struct OfflineAccountProvider {
    pub username: String,
}

impl AccountProvider for OfflineAccountProvider {
    fn credential(&self) -> anyhow::Result<AccountCredential> {
        Ok(AccountCredential::offline(&self.username))
    }
}

#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
}

/// Per-launch user inputs. Heap heuristics (auto-sizing to host RAM) are
/// deliberately not here; callers pass concrete numbers.
#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    pub min_heap_mb: Option<u32>,
    pub max_heap_mb: Option<u32>,
    pub resolution: Option<(u32, u32)>,
    pub server_join: Option<ServerAddress>,
    pub extra_jvm_args: Vec<String>,
    pub java_binary: Option<PathBuf>,
    pub demo: bool,
}

/// Everything ProcessHost needs to spawn the child. Transient; consumed by
/// one launch.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub java_binary: PathBuf,
    pub jvm_args: Vec<String>,
    pub main_class: String,
    pub game_args: Vec<String>,
    pub working_dir: PathBuf,
    pub env_overrides: HashMap<String, String>,
    pub natives_dir: PathBuf,
    /// Non-fatal findings (e.g. java major below the descriptor's floor).
    pub warnings: Vec<String>,
}

impl LaunchPlan {
    /// `[java] ++ jvm_args ++ [main_class] ++ game_args`
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.jvm_args.len() + self.game_args.len() + 2);
        argv.push(self.java_binary.to_string_lossy().to_string());
        argv.extend(self.jvm_args.iter().cloned());
        argv.push(self.main_class.clone());
        argv.extend(self.game_args.iter().cloned());
        argv
    }
}

pub struct LaunchPlanner<'a> {
    layout: &'a DataLayout,
    ctx: &'a PlatformContext,
    client_id: String,
}

impl<'a> LaunchPlanner<'a> {
    pub fn new(layout: &'a DataLayout, ctx: &'a PlatformContext) -> Self {
        Self {
            layout,
            ctx,
            client_id: "0".to_string(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Assemble the full launch plan. Deterministic: identical inputs give
    /// a byte-identical argv.
    pub fn build(
        &self,
        descriptor: &VersionDescriptor,
        settings: &UserSettings,
        account: &AccountCredential,
        working_dir: &Path,
        natives_dir: &Path,
    ) -> Result<LaunchPlan, LaunchError> {
        // Feature flags are launch inputs, not host facts, so they get
        // folded into the evaluation context here.
        let ctx = self
            .ctx
            .clone()
            .with_feature("is_demo_user", settings.demo)
            .with_feature("has_custom_resolution", settings.resolution.is_some());

        let entries = classpath_entries(descriptor, self.layout, &ctx)?;
        let classpath = join_classpath(&entries, ctx.os_name);

        let vars = self.variables(
            descriptor,
            settings,
            account,
            working_dir,
            natives_dir,
            &classpath,
            &ctx,
        );

        // JVM vector: heap first, then user extras, then the descriptor's.
        let mut jvm_args = Vec::new();
        if let Some(min) = settings.min_heap_mb {
            jvm_args.push(format!("-Xms{}m", min));
        }
        if let Some(max) = settings.max_heap_mb {
            jvm_args.push(format!("-Xmx{}m", max));
        }
        jvm_args.extend(settings.extra_jvm_args.iter().cloned());

        match descriptor.arguments.as_ref() {
            Some(arguments) => {
                let flat = flatten_arguments(&arguments.jvm, &ctx);
                jvm_args.extend(substitute_all(&flat, &vars)?);
            }
            None => {
                // Legacy descriptors predate declared JVM arguments.
                jvm_args.push(format!(
                    "-Djava.library.path={}",
                    canonical(natives_dir)
                ));
                jvm_args.push("-cp".to_string());
                jvm_args.push(classpath.clone());
            }
        }

        if !jvm_args
            .iter()
            .any(|a| a.starts_with("-Djava.library.path="))
        {
            jvm_args.push(format!("-Djava.library.path={}", canonical(natives_dir)));
        }

        // Game vector: descriptor args, then resolution, then server join.
        let mut game_args = match (
            descriptor.arguments.as_ref(),
            descriptor.minecraft_arguments.as_deref(),
        ) {
            (Some(arguments), _) => {
                let flat = flatten_arguments(&arguments.game, &ctx);
                substitute_all(&flat, &vars)?
            }
            (None, Some(legacy)) => substitute_all(&tokenize_legacy(legacy), &vars)?,
            (None, None) => Vec::new(),
        };

        if let Some((width, height)) = settings.resolution {
            // Modern descriptors emit --width/--height through their own
            // has_custom_resolution group; only fill the gap.
            if !game_args.iter().any(|a| a == "--width") {
                game_args.push("--width".to_string());
                game_args.push(width.to_string());
                game_args.push("--height".to_string());
                game_args.push(height.to_string());
            }
        }

        if let Some(ref server) = settings.server_join {
            game_args.push("--server".to_string());
            game_args.push(server.host.clone());
            if let Some(port) = server.port {
                game_args.push("--port".to_string());
                game_args.push(port.to_string());
            }
        }

        let runtime = resolve_runtime(settings.java_binary.as_deref())?;
        let mut warnings = Vec::new();
        if let (Some(required), Some(actual)) = (
            descriptor.java_version.as_ref().map(|j| j.major_version),
            runtime.major,
        ) {
            if actual < required {
                let warning = format!(
                    "java {} is older than the required major {} for {}",
                    actual, required, descriptor.id
                );
                log::warn!("{}", warning);
                warnings.push(warning);
            }
        }

        Ok(LaunchPlan {
            java_binary: runtime.binary,
            jvm_args,
            main_class: descriptor.main_class.clone(),
            game_args,
            working_dir: working_dir.to_path_buf(),
            env_overrides: HashMap::new(),
            natives_dir: natives_dir.to_path_buf(),
            warnings,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn variables(
        &self,
        descriptor: &VersionDescriptor,
        settings: &UserSettings,
        account: &AccountCredential,
        working_dir: &Path,
        natives_dir: &Path,
        classpath: &str,
        ctx: &PlatformContext,
    ) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        vars.insert(
            "auth_player_name".to_string(),
            account.username.clone(),
        );
        vars.insert("auth_uuid".to_string(), account.uuid.replace('-', ""));
        vars.insert(
            "auth_access_token".to_string(),
            account.access_token.clone(),
        );
        // Pre-1.8 descriptors call the token a session.
        vars.insert("auth_session".to_string(), account.access_token.clone());
        vars.insert("user_type".to_string(), account.user_type.clone());
        vars.insert(
            "auth_xuid".to_string(),
            account.xuid.clone().unwrap_or_default(),
        );
        vars.insert("clientid".to_string(), self.client_id.clone());

        vars.insert("version_name".to_string(), descriptor.id.clone());
        vars.insert(
            "version_type".to_string(),
            descriptor.version_type.clone(),
        );

        let assets_root = canonical(&self.layout.assets_dir());
        vars.insert("game_directory".to_string(), canonical(working_dir));
        vars.insert("assets_root".to_string(), assets_root.clone());
        // Legacy name for the same directory.
        vars.insert("game_assets".to_string(), assets_root);
        vars.insert(
            "assets_index_name".to_string(),
            descriptor.asset_index.id.clone(),
        );

        vars.insert("natives_directory".to_string(), canonical(natives_dir));
        vars.insert("classpath".to_string(), classpath.to_string());
        vars.insert(
            "classpath_separator".to_string(),
            ctx.os_name.classpath_separator().to_string(),
        );
        vars.insert(
            "library_directory".to_string(),
            canonical(&self.layout.libraries_dir()),
        );

        vars.insert("launcher_name".to_string(), LAUNCHER_NAME.to_string());
        vars.insert(
            "launcher_version".to_string(),
            LAUNCHER_VERSION.to_string(),
        );
        vars.insert("user_properties".to_string(), "{}".to_string());

        if let Some((width, height)) = settings.resolution {
            vars.insert("resolution_width".to_string(), width.to_string());
            vars.insert("resolution_height".to_string(), height.to_string());
        }

        vars
    }
}

/// Prefer canonicalized paths so argv stays consistent regardless of how
/// the root directory was spelled on the command line.
fn canonical(path: &Path) -> String {
    dunce::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string_lossy().to_string())
}
