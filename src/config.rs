use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::VerifyMode;
use crate::error::FetchError;

pub const DEFAULT_API_BASE: &str = "https://civitai.com/api/v1";
pub const DEFAULT_PREVIEW_WIDTH: u32 = 512;

/// Logical destination category of a request, taken from the token prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Model,
    Vae,
    Lora,
    Embedding,
    ControlNet,
    Upscaler,
    Adetailer,
    Clip,
    Unet,
    Vision,
    Encoder,
    Diffusion,
    Config,
    Extension,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Model,
        Category::Vae,
        Category::Lora,
        Category::Embedding,
        Category::ControlNet,
        Category::Upscaler,
        Category::Adetailer,
        Category::Clip,
        Category::Unet,
        Category::Vision,
        Category::Encoder,
        Category::Diffusion,
        Category::Config,
        Category::Extension,
    ];

    /// Parses a prefix or one of its common aliases. Returns `None` for
    /// anything unknown; callers fall back to [`Category::Model`].
    pub fn parse(prefix: &str) -> Option<Category> {
        let category = match prefix.trim().to_ascii_lowercase().as_str() {
            "model" | "models" | "ckpt" | "checkpoint" => Category::Model,
            "vae" | "vaes" => Category::Vae,
            "lora" | "loras" | "lycoris" => Category::Lora,
            "embed" | "embedding" | "embeddings" | "textualinversion" => Category::Embedding,
            "cnet" | "control" | "controlnet" => Category::ControlNet,
            "upscale" | "upscaler" | "esrgan" => Category::Upscaler,
            "adetailer" | "ad" => Category::Adetailer,
            "clip" => Category::Clip,
            "unet" => Category::Unet,
            "vision" | "clip_vision" => Category::Vision,
            "encoder" | "text_encoder" => Category::Encoder,
            "diffusion" | "diffusion_models" => Category::Diffusion,
            "config" | "configs" => Category::Config,
            "ext" | "extension" | "extensions" => Category::Extension,
            _ => return None,
        };
        Some(category)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Model => "model",
            Category::Vae => "vae",
            Category::Lora => "lora",
            Category::Embedding => "embedding",
            Category::ControlNet => "controlnet",
            Category::Upscaler => "upscaler",
            Category::Adetailer => "adetailer",
            Category::Clip => "clip",
            Category::Unet => "unet",
            Category::Vision => "vision",
            Category::Encoder => "encoder",
            Category::Diffusion => "diffusion",
            Category::Config => "config",
            Category::Extension => "extension",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    pub dir: PathBuf,
    #[serde(default)]
    pub tag: String,
}

impl DirEntry {
    pub fn new(dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tag: tag.into(),
        }
    }
}

/// Category → destination directory mapping. The `model` entry is mandatory
/// and serves as the fallback for every category without its own entry.
#[derive(Debug, Clone)]
pub struct DirectoryTable {
    model: DirEntry,
    entries: HashMap<Category, DirEntry>,
}

impl DirectoryTable {
    pub fn from_map(map: BTreeMap<String, DirEntry>) -> Result<Self, FetchError> {
        let mut entries = HashMap::with_capacity(map.len());
        for (key, entry) in map {
            let category = Category::parse(&key)
                .ok_or_else(|| FetchError::Config(format!("unknown directory table key '{}'", key)))?;
            if entry.dir.as_os_str().is_empty() {
                return Err(FetchError::Config(format!("empty directory for '{}'", key)));
            }
            entries.insert(category, entry);
        }
        let model = entries
            .remove(&Category::Model)
            .ok_or_else(|| FetchError::Config("directory table has no 'model' entry".to_string()))?;
        Ok(Self { model, entries })
    }

    /// The directory layout of a Stable Diffusion WebUI install rooted at `root`.
    pub fn webui_layout(root: &Path) -> Self {
        let models = root.join("models");
        let mut entries = HashMap::new();
        let mut put = |category: Category, dir: PathBuf, tag: &str| {
            entries.insert(category, DirEntry::new(dir, tag));
        };
        put(Category::Vae, models.join("VAE"), "VAE");
        put(Category::Lora, models.join("Lora"), "LoRA");
        put(Category::Embedding, root.join("embeddings"), "Embedding");
        put(Category::ControlNet, models.join("ControlNet"), "ControlNet");
        put(Category::Upscaler, models.join("ESRGAN"), "Upscaler");
        put(Category::Adetailer, models.join("adetailer"), "ADetailer");
        put(Category::Clip, models.join("text_encoder"), "Clip");
        put(Category::Unet, models.join("unet"), "Unet");
        put(Category::Vision, models.join("clip_vision"), "Vision");
        put(Category::Encoder, models.join("text_encoder"), "Encoder");
        put(Category::Diffusion, models.join("diffusion_models"), "Diffusion");
        put(Category::Config, root.to_path_buf(), "Config");
        put(Category::Extension, root.join("extensions"), "Extension");
        Self {
            model: DirEntry::new(models.join("Stable-diffusion"), "Model"),
            entries,
        }
    }

    pub fn lookup(&self, category: Category) -> &DirEntry {
        self.entries.get(&category).unwrap_or(&self.model)
    }

    pub fn model(&self) -> &DirEntry {
        &self.model
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolPaths {
    pub aria2c: PathBuf,
    pub gdown: PathBuf,
    pub curl: PathBuf,
    pub git: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            aria2c: PathBuf::from("aria2c"),
            gdown: PathBuf::from("gdown"),
            curl: PathBuf::from("curl"),
            git: PathBuf::from("git"),
        }
    }
}

/// On-disk form of [`Config`]. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    civitai_token: Option<String>,
    hf_token: Option<String>,
    directories: BTreeMap<String, DirEntry>,
    concurrency: Option<usize>,
    verbose: bool,
    constrained_env: bool,
    preview_width: Option<u32>,
    tools: ToolPaths,
    extension_depth: Option<u32>,
    extension_recursive: Option<bool>,
    api_base: Option<String>,
    verify: VerifyMode,
    save_previews: Option<bool>,
    save_model_info: Option<bool>,
}

/// Settings shared by every component, built once per process.
#[derive(Debug, Clone)]
pub struct Config {
    pub civitai_token: Option<String>,
    pub hf_token: Option<String>,
    pub directories: DirectoryTable,
    pub concurrency: usize,
    pub verbose: bool,
    /// Hosted notebook environments that must not fetch adult previews.
    pub constrained_env: bool,
    pub preview_width: Option<u32>,
    pub tools: ToolPaths,
    pub extension_depth: u32,
    pub extension_recursive: bool,
    pub api_base: String,
    pub verify: VerifyMode,
    pub save_previews: bool,
    pub save_model_info: bool,
}

impl Config {
    /// Defaults for a WebUI install at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            civitai_token: None,
            hf_token: None,
            directories: DirectoryTable::webui_layout(root),
            concurrency: num_cpus::get(),
            verbose: false,
            constrained_env: false,
            preview_width: Some(DEFAULT_PREVIEW_WIDTH),
            tools: ToolPaths::default(),
            extension_depth: 1,
            extension_recursive: true,
            api_base: DEFAULT_API_BASE.to_string(),
            verify: VerifyMode::Auto,
            save_previews: true,
            save_model_info: true,
        }
    }

    /// Parses a JSON config. Directories missing from the file come from the
    /// WebUI layout under `root`; a file that lists directories must list `model`.
    pub fn from_json(content: &str, root: &Path) -> Result<Self, FetchError> {
        let file: ConfigFile = serde_json::from_str(content)
            .map_err(|e| FetchError::Config(format!("invalid config: {}", e)))?;
        let defaults = Config::new(root);

        let directories = if file.directories.is_empty() {
            defaults.directories
        } else {
            DirectoryTable::from_map(file.directories)?
        };

        Ok(Self {
            civitai_token: non_empty(file.civitai_token),
            hf_token: non_empty(file.hf_token),
            directories,
            concurrency: file.concurrency.filter(|c| *c > 0).unwrap_or(defaults.concurrency),
            verbose: file.verbose,
            constrained_env: file.constrained_env,
            preview_width: file.preview_width.or(defaults.preview_width),
            tools: file.tools,
            extension_depth: file.extension_depth.unwrap_or(defaults.extension_depth),
            extension_recursive: file.extension_recursive.unwrap_or(defaults.extension_recursive),
            api_base: file
                .api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            verify: file.verify,
            save_previews: file.save_previews.unwrap_or(defaults.save_previews),
            save_model_info: file.save_model_info.unwrap_or(defaults.save_model_info),
        })
    }

    pub fn load(path: &Path, root: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&content, root)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
