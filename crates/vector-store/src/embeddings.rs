use crate::error::{Result, VectorStoreError};
use ndarray::{Array, Axis, Ix2, Ix3};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::task::spawn_blocking;

pub const DEFAULT_MODEL_ID: &str = "all-minilm-l6-v2";
pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EmbeddingMode {
    Fast,
    Stub,
}

impl EmbeddingMode {
    fn from_env() -> Result<Self> {
        let raw = env::var("PATCHWISE_EMBEDDING_MODE")
            .unwrap_or_else(|_| "fast".to_string())
            .to_ascii_lowercase();
        match raw.as_str() {
            "fast" => Ok(Self::Fast),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported PATCHWISE_EMBEDDING_MODE '{other}' (expected 'fast' or 'stub')"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ModelId(String);

impl Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ModelId {
    fn from_raw(model_name: &str) -> Self {
        let normalized = Self::normalize(model_name);
        Self(normalized)
    }

    fn from_env() -> Self {
        let model_name = env::var("PATCHWISE_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::from_raw(&model_name)
    }

    fn normalize(raw: &str) -> String {
        let model_name = raw.trim().to_ascii_lowercase();
        match model_name.as_str() {
            "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" | "minilm" => {
                DEFAULT_MODEL_ID.to_string()
            }
            other => other.to_string(),
        }
    }

    fn spec(&self) -> Result<ModelSpec> {
        let base = model_dir();
        let manifest_path = base.join("manifest.json");

        if manifest_path.exists() {
            let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
                VectorStoreError::EmbeddingError(format!(
                    "Failed to read models manifest {}: {e}",
                    manifest_path.display()
                ))
            })?;
            return spec_from_manifest(self, &raw, &manifest_path);
        }

        // Without a manifest only the default sentence-transformer layout is known.
        if self.0 == DEFAULT_MODEL_ID {
            return Ok(ModelSpec {
                id: self.clone(),
                onnx_rel_path: PathBuf::from("model.onnx"),
                tokenizer_rel_path: PathBuf::from("tokenizer.json"),
                dimension: DEFAULT_DIMENSION,
                max_length: 256,
                max_batch: 32,
            });
        }

        Err(VectorStoreError::EmbeddingError(format!(
            "Unknown embedding model id '{}' and no models manifest found at {}",
            self.0,
            manifest_path.display()
        )))
    }
}

#[derive(Clone, Debug)]
struct ModelSpec {
    id: ModelId,
    onnx_rel_path: PathBuf,
    tokenizer_rel_path: PathBuf,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
}

#[derive(Debug, Deserialize)]
struct ManifestAsset {
    path: String,
}

fn spec_from_manifest(id: &ModelId, raw: &str, manifest_path: &Path) -> Result<ModelSpec> {
    let manifest: ModelsManifest = serde_json::from_str(raw).map_err(|e| {
        VectorStoreError::EmbeddingError(format!(
            "Invalid models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    if manifest.schema_version != 1 {
        return Err(VectorStoreError::EmbeddingError(format!(
            "Unsupported models manifest schema_version {} (expected 1)",
            manifest.schema_version
        )));
    }

    let wanted = id.0.as_str();
    let model = manifest
        .models
        .iter()
        .find(|m| m.id.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            let available = manifest
                .models
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            VectorStoreError::EmbeddingError(format!(
                "Unknown embedding model id '{wanted}'. Available: {available}"
            ))
        })?;

    let prefix = format!("{}/", model.id);
    let mut onnx_rel_path: Option<PathBuf> = None;
    let mut tokenizer_rel_path: Option<PathBuf> = None;
    for asset in &model.assets {
        let Some(rel) = asset.path.strip_prefix(&prefix) else {
            continue;
        };
        let asset_path = Path::new(asset.path.as_str());
        if onnx_rel_path.is_none()
            && asset_path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            onnx_rel_path = Some(safe_rel_path_from_manifest(&model.id, rel)?);
        }
        if tokenizer_rel_path.is_none()
            && asset_path
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case("tokenizer.json"))
        {
            tokenizer_rel_path = Some(safe_rel_path_from_manifest(&model.id, rel)?);
        }
    }

    Ok(ModelSpec {
        id: id.clone(),
        onnx_rel_path: onnx_rel_path.unwrap_or_else(|| PathBuf::from("model.onnx")),
        tokenizer_rel_path: tokenizer_rel_path.unwrap_or_else(|| PathBuf::from("tokenizer.json")),
        dimension: model.dimension,
        max_length: model.max_length,
        max_batch: model.max_batch.max(1),
    })
}

fn safe_rel_path_from_manifest(model_id: &str, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Invalid models manifest asset path for model '{model_id}': '{rel}'"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => has_component = true,
        }
    }
    if !has_component {
        return Err(VectorStoreError::EmbeddingError(format!(
            "Invalid models manifest asset path for model '{model_id}': empty path"
        )));
    }
    Ok(path.to_path_buf())
}

/// Directory holding `manifest.json` and per-model asset folders
pub fn model_dir() -> PathBuf {
    if let Ok(path) = env::var("PATCHWISE_MODEL_DIR") {
        return PathBuf::from(path);
    }

    if let Ok(mut dir) = env::current_dir() {
        loop {
            let candidate = dir.join("models");
            if candidate.join("manifest.json").exists() {
                return candidate;
            }
            if !dir.pop() {
                break;
            }
        }
    }

    let base = env::var("XDG_CACHE_HOME").map_or_else(
        |_| {
            env::var("HOME")
                .map_or_else(|_| PathBuf::from("."), PathBuf::from)
                .join(".cache")
        },
        PathBuf::from,
    );
    base.join("patchwise").join("models")
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

impl OrtBackend {
    fn new(spec: &ModelSpec, model_dir: &Path) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let model_root = model_dir.join(spec.id.to_string());
        let model_path = model_root.join(&spec.onnx_rel_path);
        let tokenizer_path = model_root.join(&spec.tokenizer_rel_path);
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {} (set PATCHWISE_MODEL_DIR, or PATCHWISE_EMBEDDING_MODE=stub for offline use).",
                spec.id,
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Tokenizer truncation failed: {e}"))
            })?;

        let session = Session::builder()
            .map_err(|e| VectorStoreError::EmbeddingError(format!("{e}")))?
            .with_intra_threads(default_intra_threads())
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set ORT intra threads: {e}"))
            })?
            .with_execution_providers(build_execution_providers())
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!(
                    "Failed to register execution providers: {e}"
                ))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set optimization level: {e}"))
            })?
            .commit_from_file(&model_path)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to load ONNX model: {e}"))
            })?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length: spec.max_length,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("Tokenization failed: {e}"))
                })?;

            let Some(first) = encodings.first() else {
                continue;
            };
            let seq_len = first.len();
            if seq_len > self.max_length {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Tokenized length {} exceeds max_length {}",
                    seq_len, self.max_length
                )));
            }
            let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

            let ids_array = Array::from_shape_vec((batch.len(), seq_len), ids)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("IDs shape error: {e}")))?;
            let mask_array = Array::from_shape_vec((batch.len(), seq_len), masks)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Mask shape error: {e}")))?;
            let type_array = Array::from_shape_vec((batch.len(), seq_len), type_ids)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Types shape error: {e}")))?;

            let mut available: HashMap<String, DynTensor> = HashMap::new();
            available.insert("input_ids".to_string(), to_tensor(ids_array)?);
            available.insert("attention_mask".to_string(), to_tensor(mask_array)?);
            available.insert("token_type_ids".to_string(), to_tensor(type_array)?);

            let array = {
                let mut session = self.session.lock().map_err(|_| {
                    VectorStoreError::EmbeddingError("Failed to lock ONNX session".into())
                })?;

                let wanted: Vec<String> =
                    session.inputs.iter().map(|input| input.name.clone()).collect();
                let mut feed: HashMap<String, DynTensor> = HashMap::new();
                for key in wanted {
                    let value = available.remove(&key).ok_or_else(|| {
                        VectorStoreError::EmbeddingError(format!("Unsupported ONNX input '{key}'"))
                    })?;
                    feed.insert(key, value);
                }

                let outputs = session.run(SessionInputs::from(feed)).map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("ONNX forward failed: {e}"))
                })?;
                if outputs.len() == 0 {
                    return Err(VectorStoreError::EmbeddingError(
                        "ONNX returned no outputs".to_string(),
                    ));
                }

                let array = outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        VectorStoreError::EmbeddingError(format!(
                            "Failed to decode ONNX output: {e}"
                        ))
                    })?
                    .to_owned();

                drop(outputs);
                drop(session);

                array
            };
            results.extend(embeddings_from_output(array, &mask_rows, self.dimension)?);
        }

        Ok(results)
    }
}

fn to_tensor(array: ndarray::Array2<i64>) -> Result<DynTensor> {
    Ok(Tensor::from_array(array.into_dyn())
        .map_err(|e| VectorStoreError::EmbeddingError(format!("{e}")))?
        .upcast())
}

fn default_intra_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match cpus {
        0..=4 => 1,
        5..=12 => 2,
        _ => 4,
    }
}

fn build_execution_providers() -> Vec<ExecutionProviderDispatch> {
    let wants_cuda = env::var("PATCHWISE_USE_CUDA")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if wants_cuda {
        let cuda = CUDAExecutionProvider::default();
        match cuda.is_available() {
            Ok(true) => return vec![cuda.build(), CPUExecutionProvider::default().build()],
            Ok(false) => log::warn!("CUDA execution provider unavailable, using CPU"),
            Err(err) => log::warn!("CUDA execution provider check failed, using CPU: {err}"),
        }
    }
    vec![CPUExecutionProvider::default().build()]
}

fn embeddings_from_output(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match array.ndim() {
        2 => {
            let embeddings = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            for row in embeddings.outer_iter() {
                let mut emb = row.to_vec();
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let attn = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                let mut emb = mean_pool(sample.view(), &attn);
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        _ => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }
    Ok(out)
}

fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    if sample.is_empty() {
        return vec![];
    }

    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token_idx, token) in sample.outer_iter().enumerate() {
        if *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }

    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

fn build_flat_tensors(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let encoding_ids = encoding.get_ids();
        let encoding_masks = encoding.get_attention_mask();
        let encoding_types = encoding.get_type_ids();

        for idx in 0..seq_len {
            ids.push(i64::from(*encoding_ids.get(idx).unwrap_or(&0)));
            masks.push(i64::from(*encoding_masks.get(idx).unwrap_or(&0)));
            type_ids.push(i64::from(*encoding_types.get(idx).unwrap_or(&0)));
        }

        mask_rows.push(
            encoding_masks
                .iter()
                .take(seq_len)
                .map(|v| i64::from(*v))
                .collect(),
        );
    }

    (ids, masks, type_ids, mask_rows)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Deterministic pseudo-embedding: same text, same unit vector.
fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Sentence embedding model: ONNX Runtime, or the hash-based stub for offline runs
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    model_id: String,
    dimension: usize,
}

enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Stub,
}

impl EmbeddingModel {
    /// Model selected by `PATCHWISE_EMBEDDING_MODE` / `PATCHWISE_EMBEDDING_MODEL`
    pub fn new() -> Result<Self> {
        let mode = EmbeddingMode::from_env()?;
        let id = ModelId::from_env();
        Self::from_mode_and_id(mode, &id)
    }

    /// Stub model of the given dimension, regardless of environment
    #[must_use]
    pub fn stub(dimension: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Stub,
            model_id: format!("stub-{dimension}"),
            dimension,
        }
    }

    fn from_mode_and_id(mode: EmbeddingMode, id: &ModelId) -> Result<Self> {
        let spec = id.spec()?;
        let backend = match mode {
            EmbeddingMode::Stub => EmbeddingBackend::Stub,
            EmbeddingMode::Fast => {
                EmbeddingBackend::Ort(Arc::new(OrtBackend::new(&spec, &model_dir())?))
            }
        };
        Ok(Self {
            backend,
            model_id: spec.id.to_string(),
            dimension: spec.dimension,
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }

    pub async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned: Vec<String> = texts.into_iter().map(ToString::to_string).collect();
        match &self.backend {
            EmbeddingBackend::Stub => Ok(owned
                .iter()
                .map(|text| stub_embed(text, self.dimension))
                .collect()),
            EmbeddingBackend::Ort(backend) => {
                let backend = backend.clone();
                spawn_blocking(move || backend.embed_batch_blocking(&owned))
                    .await
                    .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))?
            }
        }
    }
}
