use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use annotate::{AnnotationRequest, AnnotationTask};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::BatchError;
use crate::jsonl;

/// SHA-256 digests of every batch input file written for a task, the jobs
/// submitted for them and the inputs each downloaded output came from.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub task: Option<AnnotationTask>,
    /// File name -> hex digest
    pub inputs: BTreeMap<String, String>,
    /// Input file name -> job id submitted but not yet downloaded
    #[serde(default)]
    pub jobs: BTreeMap<String, String>,
    /// Output file name -> digest of the input it answers
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// What happened to an input file when a batch was prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    /// Existing file matched the manifest and the requests; left untouched
    Reused,
    Written,
}

/// Files already present for one task.
#[derive(Debug, Default)]
pub struct WorkDirScan {
    pub inputs: BTreeMap<usize, PathBuf>,
    pub outputs: BTreeMap<usize, PathBuf>,
}

/// Directory holding a task's batch inputs, outputs and manifest.
///
/// Files are numbered from 1: `<task>_batchinput_<n>.jsonl` and
/// `<task>_batch_output_<n>.jsonl`.
pub struct WorkDir {
    root: PathBuf,
    task: AnnotationTask,
}

impl WorkDir {
    pub fn open(root: &Path, task: AnnotationTask) -> Result<Self, BatchError> {
        fs::create_dir_all(root).map_err(|e| BatchError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            task,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_path(&self, n: usize) -> PathBuf {
        self.root
            .join(format!("{}_batchinput_{}.jsonl", self.task.name(), n))
    }

    pub fn output_path(&self, n: usize) -> PathBuf {
        self.root
            .join(format!("{}_batch_output_{}.jsonl", self.task.name(), n))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(format!("{}_manifest.json", self.task.name()))
    }

    pub fn scan(&self) -> WorkDirScan {
        let input_prefix = format!("{}_batchinput_", self.task.name());
        let output_prefix = format!("{}_batch_output_", self.task.name());
        let mut scan = WorkDirScan::default();

        for entry in WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if let Some(n) = batch_number(&name, &input_prefix) {
                scan.inputs.insert(n, entry.path().to_path_buf());
            } else if let Some(n) = batch_number(&name, &output_prefix) {
                scan.outputs.insert(n, entry.path().to_path_buf());
            }
        }

        debug!(
            task = %self.task,
            inputs = scan.inputs.len(),
            outputs = scan.outputs.len(),
            "Scanned work directory"
        );
        scan
    }

    /// Output files in batch order.
    pub fn output_files(&self) -> Vec<PathBuf> {
        self.scan().outputs.into_values().collect()
    }

    /// Output files produced from the input currently on record, in batch order.
    pub fn current_outputs(&self, manifest: &Manifest) -> Vec<PathBuf> {
        let mut current = Vec::new();
        for (n, path) in self.scan().outputs {
            if self.output_is_current(manifest, n) {
                current.push(path);
            } else {
                warn!(output = %path.display(), "Output does not match its batch input, ignoring");
            }
        }
        current
    }

    /// Whether output `n` exists and answers the recorded input `n`.
    pub fn output_is_current(&self, manifest: &Manifest, n: usize) -> bool {
        let output = self.output_path(n);
        let source = manifest.outputs.get(&file_name_of(&output));
        let input = manifest.inputs.get(&file_name_of(&self.input_path(n)));
        output.is_file() && source.is_some() && source == input
    }

    /// Job submitted for input `n` whose output was never downloaded.
    pub fn pending_job(&self, manifest: &Manifest, n: usize) -> Option<String> {
        manifest
            .jobs
            .get(&file_name_of(&self.input_path(n)))
            .cloned()
    }

    /// Remember the job for input `n` on disk straight away.
    pub fn record_job(&self, manifest: &mut Manifest, n: usize, job_id: &str) -> Result<(), BatchError> {
        manifest
            .jobs
            .insert(file_name_of(&self.input_path(n)), job_id.to_string());
        self.save_manifest(manifest)
    }

    pub fn clear_job(&self, manifest: &mut Manifest, n: usize) -> Result<(), BatchError> {
        if manifest.jobs.remove(&file_name_of(&self.input_path(n))).is_some() {
            self.save_manifest(manifest)?;
        }
        Ok(())
    }

    /// Mark output `n` as answering the current input `n` and forget its job.
    pub fn record_output(&self, manifest: &mut Manifest, n: usize) -> Result<(), BatchError> {
        let input = file_name_of(&self.input_path(n));
        let Some(input_digest) = manifest.inputs.get(&input).cloned() else {
            return Err(BatchError::MissingInput { file: input });
        };
        manifest.jobs.remove(&input);
        manifest
            .outputs
            .insert(file_name_of(&self.output_path(n)), input_digest);
        self.save_manifest(manifest)
    }

    pub fn has_output(&self, n: usize) -> bool {
        self.output_path(n).is_file()
    }

    pub fn load_manifest(&self) -> Result<Manifest, BatchError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Manifest {
                task: Some(self.task),
                ..Manifest::default()
            });
        }
        let raw = fs::read_to_string(&path).map_err(|e| BatchError::io(&path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<(), BatchError> {
        let path = self.manifest_path();
        let raw = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, raw).map_err(|e| BatchError::io(&path, e))
    }

    /// Make sure input file `n` holds exactly `requests`.
    ///
    /// An existing file is kept only when its digest matches both the
    /// manifest entry and the freshly rendered requests.
    pub fn prepare_input(
        &self,
        manifest: &mut Manifest,
        n: usize,
        requests: &[AnnotationRequest],
    ) -> Result<(PathBuf, InputStatus), BatchError> {
        let path = self.input_path(n);
        let file_name = file_name_of(&path);
        let rendered = jsonl::render_requests(requests)?;
        let wanted = digest(&rendered);

        if path.is_file() {
            let existing = fs::read(&path).map_err(|e| BatchError::io(&path, e))?;
            let on_disk = digest(&existing);
            if manifest.inputs.get(&file_name) == Some(&on_disk) && on_disk == wanted {
                debug!(file = %file_name, "Reusing batch input");
                return Ok((path, InputStatus::Reused));
            }
            info!(file = %file_name, "Batch input is stale, rebuilding");
        }

        fs::write(&path, &rendered).map_err(|e| BatchError::io(&path, e))?;
        if let Some(job_id) = manifest.jobs.remove(&file_name) {
            warn!(file = %file_name, job_id = %job_id, "Dropping job submitted for the old input");
        }
        manifest.inputs.insert(file_name, wanted);
        Ok((path, InputStatus::Written))
    }
}

fn batch_number(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?
        .strip_suffix(".jsonl")?
        .parse()
        .ok()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
