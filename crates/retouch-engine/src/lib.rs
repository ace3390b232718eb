use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::{CompareMode, CompareTarget, Comparison, EditorTool, Workspace};
use retouch_contracts::models::{ModelSelector, ModelSpec, CAPABILITY_DESCRIBE, CAPABILITY_EDIT};
use retouch_contracts::session::prompt_log::{PromptKind, PromptLog};
use retouch_contracts::session::receipts::{build_receipt, write_receipt, EditRequestRecord};
use retouch_contracts::session::summary::{write_summary, SessionSummary};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

pub mod export;
pub mod operations;
pub mod providers;
pub mod slot;
pub mod snapshot;

pub use export::{ExportFormat, ExportOptions, ExportResult};
pub use operations::{EditKind, EditOperation, Hotspot, Region};
pub use providers::{
    default_provider_registry, DescribeRequest, EditProvider, EditProviderRegistry, EditRequest,
    EditResponse, ProviderRejection,
};
pub use slot::{EditSlot, EditSlotGuard};
pub use snapshot::{parse_data_url, Snapshot, SnapshotStore};

use providers::map_object;

/// One editing session: the image history plus everything written under the session directory.
pub struct EditEngine {
    session_dir: PathBuf,
    events: EventWriter,
    store: SnapshotStore,
    workspace: Workspace<Snapshot>,
    prompts: PromptLog,
    slot: EditSlot,
    summary_path: PathBuf,
    started_at: String,
    model_selector: ModelSelector,
    edit_model: Option<String>,
    text_model: Option<String>,
    provider_options: Map<String, Value>,
    providers: EditProviderRegistry,
    description: Option<String>,
    last_fallback_reason: Option<String>,
}

/// A produced snapshot plus what its receipt records.
struct EditOutcome {
    snapshot: Snapshot,
    record: EditRequestRecord,
    provider_request: Map<String, Value>,
    provider_response: Map<String, Value>,
    warnings: Vec<String>,
}

impl EditEngine {
    pub fn new(
        session_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        edit_model: Option<String>,
        text_model: Option<String>,
    ) -> Result<Self> {
        let session_dir = session_dir.into();
        std::fs::create_dir_all(&session_dir)
            .with_context(|| format!("failed to create {}", session_dir.display()))?;
        // Snapshot paths recorded in receipts and the summary must resolve from any cwd.
        let session_dir = std::fs::canonicalize(&session_dir)
            .with_context(|| format!("failed to resolve {}", session_dir.display()))?;
        let session_id = session_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("session-rs")
            .to_string();
        let events = EventWriter::new(events_path.into(), session_id);
        let store = SnapshotStore::new(&session_dir)?;
        let prompts = PromptLog::load(session_dir.join("prompts.json"));
        let summary_path = session_dir.join("summary.json");
        let started_at = now_utc_iso();

        events.emit(
            "session_started",
            map_object(json!({
                "out_dir": session_dir.to_string_lossy().to_string(),
                "events_path": events.path().to_string_lossy().to_string(),
                "prompts_path": prompts.path().to_string_lossy().to_string(),
                "prompt_entries": prompts.len(),
            })),
        )?;
        info!(session_id = %events.session_id(), "session started");

        Ok(Self {
            session_dir,
            events,
            store,
            workspace: Workspace::new(),
            prompts,
            slot: EditSlot::new(),
            summary_path,
            started_at,
            model_selector: ModelSelector::new(None),
            edit_model,
            text_model,
            provider_options: Map::new(),
            providers: default_provider_registry(),
            description: None,
            last_fallback_reason: None,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn set_edit_model(&mut self, model: Option<String>) {
        self.edit_model = model;
    }

    pub fn edit_model(&self) -> Option<&str> {
        self.edit_model.as_deref()
    }

    pub fn set_text_model(&mut self, model: Option<String>) {
        self.text_model = model;
    }

    pub fn text_model(&self) -> Option<&str> {
        self.text_model.as_deref()
    }

    pub fn set_provider_options(&mut self, options: Map<String, Value>) {
        self.provider_options = options;
    }

    /// Replaces any provider registered under the same name.
    pub fn register_provider<P: EditProvider + 'static>(&mut self, provider: P) {
        self.providers.register(provider);
    }

    pub fn last_fallback_reason(&self) -> Option<&str> {
        self.last_fallback_reason.as_deref()
    }

    pub fn workspace(&self) -> &Workspace<Snapshot> {
        &self.workspace
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.workspace.current()
    }

    pub fn prompts(&self) -> &PromptLog {
        &self.prompts
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn upload(&mut self, path: &Path) -> Result<Snapshot> {
        let Some(_guard) = self.slot.try_acquire() else {
            bail!("an edit is already in progress");
        };
        let snapshot = self.store.import(path)?;
        self.workspace.initialize(snapshot.clone());
        self.description = None;
        self.events.emit(
            "image_uploaded",
            map_object(json!({
                "snapshot_id": snapshot.id,
                "snapshot_path": snapshot.path.to_string_lossy().to_string(),
                "source_path": path.to_string_lossy().to_string(),
                "width": snapshot.width,
                "height": snapshot.height,
                "mime_type": snapshot.mime_type,
            })),
        )?;
        info!(snapshot_id = %snapshot.id, "image uploaded");

        match self.describe_snapshot(&snapshot) {
            Ok(text) => {
                self.prompts.add(PromptKind::InitialDescription, &text)?;
                self.emit_description_ready(&snapshot, "initial", &text)?;
                self.description = Some(text);
            }
            Err(err) => self.emit_description_failed(&snapshot, "initial", &err)?,
        }
        Ok(snapshot)
    }

    /// Runs one edit against the current snapshot and appends the result.
    ///
    /// On failure the history is left exactly as it was.
    pub fn apply(&mut self, operation: EditOperation) -> Result<Snapshot> {
        let Some(source) = self.workspace.current().cloned() else {
            bail!("no image loaded; upload an image first");
        };
        let Some(_guard) = self.slot.try_acquire() else {
            bail!("an edit is already in progress");
        };

        match self.run_edit(&source, &operation) {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                warn!(operation = operation.kind().as_str(), error = %err, "edit failed");
                self.events.emit(
                    "edit_failed",
                    map_object(json!({
                        "operation": operation.kind().as_str(),
                        "label": operation.label(),
                        "source_snapshot_id": source.id,
                        "error": error_chain_text(&err, 2048),
                    })),
                )?;
                Err(err)
            }
        }
    }

    fn run_edit(&mut self, source: &Snapshot, operation: &EditOperation) -> Result<Snapshot> {
        operation.validate(source.width, source.height)?;

        let prompt_entry = operation.prompt_entry();
        if let Some((kind, content)) = &prompt_entry {
            self.prompts.add(*kind, content)?;
        }
        self.events.emit(
            "edit_started",
            map_object(json!({
                "operation": operation.kind().as_str(),
                "label": operation.label(),
                "source_snapshot_id": source.id,
            })),
        )?;

        let started = Instant::now();
        let outcome = if operation.is_local() {
            self.edit_locally(source, operation)?
        } else {
            self.edit_with_provider(source, operation)?
        };
        let EditOutcome {
            snapshot,
            record,
            provider_request,
            provider_response,
            warnings,
        } = outcome;

        let receipt_path = self
            .session_dir
            .join("receipts")
            .join(format!("receipt-{}.json", snapshot.id));
        let result_metadata = map_object(json!({
            "latency_s": started.elapsed().as_secs_f64(),
            "width": snapshot.width,
            "height": snapshot.height,
            "model_fallback": self.last_fallback_reason,
        }));
        let receipt = build_receipt(
            &record,
            &provider_request,
            &provider_response,
            &warnings,
            &snapshot.path,
            &receipt_path,
            &result_metadata,
        );
        write_receipt(&receipt_path, &receipt)?;

        // Nothing below can fail; an error above leaves the history unchanged.
        let cursor = self
            .workspace
            .history()
            .cursor()
            .map_or(0, |cursor| cursor + 1);
        self.events.emit(
            "snapshot_appended",
            map_object(json!({
                "snapshot_id": snapshot.id,
                "snapshot_path": snapshot.path.to_string_lossy().to_string(),
                "receipt_path": receipt_path.to_string_lossy().to_string(),
                "operation": operation.kind().as_str(),
                "width": snapshot.width,
                "height": snapshot.height,
                "cursor": cursor,
                "total": cursor + 1,
                "warnings": warnings,
            })),
        )?;
        self.workspace.append(snapshot.clone());

        if operation.stars_on_success() {
            if let Some((_, content)) = &prompt_entry {
                if let Err(err) = self.prompts.star_matching(content) {
                    warn!(error = %err, "failed to star prompt entry");
                }
            }
        }

        info!(snapshot_id = %snapshot.id, operation = operation.kind().as_str(), "snapshot appended");
        Ok(snapshot)
    }

    fn edit_locally(&mut self, source: &Snapshot, operation: &EditOperation) -> Result<EditOutcome> {
        let EditOperation::Crop { region } = operation else {
            bail!("{} has no local implementation", operation.kind().as_str());
        };
        let cropped = source
            .load_image()?
            .crop_imm(region.x, region.y, region.width, region.height);
        let snapshot = self.store.persist_image(&cropped, EditKind::Crop)?;
        let record = self.request_record(source, operation, String::new(), "local", None);
        let provider_request = map_object(json!({
            "endpoint": "local",
            "payload": {"operation": "crop", "region": region},
        }));
        let provider_response = map_object(json!({
            "status": "ok",
            "width": snapshot.width,
            "height": snapshot.height,
        }));
        Ok(EditOutcome {
            snapshot,
            record,
            provider_request,
            provider_response,
            warnings: Vec::new(),
        })
    }

    fn edit_with_provider(
        &mut self,
        source: &Snapshot,
        operation: &EditOperation,
    ) -> Result<EditOutcome> {
        let model = self.select_model(self.edit_model.clone(), CAPABILITY_EDIT)?;
        let instruction = operation
            .instruction(source.width, source.height)
            .unwrap_or_default();
        let Some(provider) = self.providers.get(&model.provider) else {
            bail!(
                "edit provider '{}' not registered (available: [{}])",
                model.provider,
                self.providers.names().join(", ")
            );
        };
        debug!(provider = %model.provider, model = %model.name, "dispatching edit");
        let request = EditRequest {
            source: source.clone(),
            operation: operation.clone(),
            instruction: instruction.clone(),
            model: model.name.clone(),
            provider_options: self.provider_options.clone(),
        };
        let response = provider
            .edit(&request)
            .with_context(|| format!("{} edit failed", operation.kind().as_str()))?;
        let snapshot = self.store.persist(
            &response.image_bytes,
            response.mime_type.as_deref(),
            operation.kind(),
        )?;
        let record = self.request_record(
            source,
            operation,
            instruction,
            &model.provider,
            Some(model.name.clone()),
        );
        Ok(EditOutcome {
            snapshot,
            record,
            provider_request: response.provider_request,
            provider_response: response.provider_response,
            warnings: response.warnings,
        })
    }

    fn request_record(
        &self,
        source: &Snapshot,
        operation: &EditOperation,
        instruction: String,
        provider: &str,
        model: Option<String>,
    ) -> EditRequestRecord {
        EditRequestRecord {
            operation: operation.kind().as_str().to_string(),
            label: operation.label(),
            instruction,
            provider: provider.to_string(),
            model,
            source_snapshot_id: source.id.clone(),
            parameters: operation.parameters(),
        }
    }

    pub fn undo(&mut self) -> Result<bool> {
        let moved = self.workspace.undo();
        if moved {
            self.emit_history_event("history_moved", Some("undo"))?;
        }
        Ok(moved)
    }

    pub fn redo(&mut self) -> Result<bool> {
        let moved = self.workspace.redo();
        if moved {
            self.emit_history_event("history_moved", Some("redo"))?;
        }
        Ok(moved)
    }

    /// Back to the original upload; later snapshots are discarded.
    pub fn reset(&mut self) -> Result<()> {
        self.workspace.reset();
        self.emit_history_event("history_reset", None)
    }

    /// Drops the whole history so a new image can be uploaded. The prompt log is kept.
    pub fn start_over(&mut self) -> Result<()> {
        self.workspace.clear();
        self.description = None;
        self.emit_history_event("history_cleared", None)
    }

    pub fn clear_prompts(&mut self) -> Result<()> {
        self.prompts.clear()
    }

    pub fn set_active_tool(&mut self, tool: EditorTool) -> Result<()> {
        self.workspace.set_tool(tool);
        self.events.emit(
            "tool_changed",
            map_object(json!({ "tool": tool.as_str() })),
        )?;
        Ok(())
    }

    pub fn cycle_compare_mode(&mut self) -> Result<CompareMode> {
        let mode = self.workspace.cycle_compare_mode();
        self.emit_compare_changed()?;
        Ok(mode)
    }

    pub fn toggle_compare_target(&mut self) -> Result<CompareTarget> {
        let target = self.workspace.toggle_compare_target();
        self.emit_compare_changed()?;
        Ok(target)
    }

    pub fn comparison(&self) -> Comparison<'_, Snapshot> {
        self.workspace.comparison()
    }

    pub fn describe_current(&mut self) -> Result<String> {
        let Some(current) = self.workspace.current().cloned() else {
            bail!("no image loaded; upload an image first");
        };
        match self.describe_snapshot(&current) {
            Ok(text) => {
                self.emit_description_ready(&current, "current", &text)?;
                self.description = Some(text.clone());
                Ok(text)
            }
            Err(err) => {
                self.emit_description_failed(&current, "current", &err)?;
                Err(err)
            }
        }
    }

    /// Writes the current snapshot to `out`. A directory gets the default export file name.
    pub fn export(&mut self, options: &ExportOptions, out: &Path) -> Result<ExportResult> {
        let Some(current) = self.workspace.current().cloned() else {
            bail!("no image to export; upload an image first");
        };
        options.validate()?;
        let out_path = export::resolve_export_path(out, options.format);

        match self.describe_snapshot(&current) {
            Ok(text) => {
                self.prompts.add(PromptKind::FinalDescription, &text)?;
                self.emit_description_ready(&current, "final", &text)?;
            }
            Err(err) => self.emit_description_failed(&current, "final", &err)?,
        }

        let image = current.load_image()?;
        let result = export::export_image(&image, options, &out_path)?;
        self.events.emit(
            "exported",
            map_object(json!({
                "snapshot_id": current.id,
                "path": result.path.to_string_lossy().to_string(),
                "format": result.format.as_str(),
                "quality": options.quality,
                "scale": options.scale,
                "width": result.width,
                "height": result.height,
                "bytes": result.bytes,
            })),
        )?;
        info!(path = %result.path.display(), "exported");
        Ok(result)
    }

    pub fn finish(&mut self) -> Result<SessionSummary> {
        let history = self.workspace.history();
        let summary = SessionSummary {
            session_id: self.events.session_id().to_string(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_snapshots: history.len() as u64,
            cursor: history.cursor().map(|cursor| cursor as u64),
            current_snapshot: history
                .current()
                .map(|snapshot| snapshot.path.to_string_lossy().to_string()),
            original_snapshot: history
                .original()
                .map(|snapshot| snapshot.path.to_string_lossy().to_string()),
            prompt_entries: self.prompts.len() as u64,
        };
        let extra = map_object(json!({
            "compare_mode": self.workspace.compare_mode().as_str(),
            "compare_target": self.workspace.compare_target().as_str(),
            "tool": self.workspace.tool().as_str(),
            "snapshot_dir": self.store.dir().to_string_lossy().to_string(),
            "edit_model": self.edit_model,
            "text_model": self.text_model,
        }));
        write_summary(&self.summary_path, &summary, Some(&extra))?;
        self.events.emit(
            "session_finished",
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string()
            })),
        )?;
        Ok(summary)
    }

    fn select_model(&mut self, requested: Option<String>, capability: &str) -> Result<ModelSpec> {
        let selection = self
            .model_selector
            .select(requested.as_deref(), capability)
            .map_err(|err| anyhow!(err))?;
        if requested.is_some() {
            if let Some(reason) = &selection.fallback_reason {
                warn!(%reason, "model fallback");
            }
        }
        self.last_fallback_reason = selection.fallback_reason;
        Ok(selection.model)
    }

    fn describe_snapshot(&mut self, snapshot: &Snapshot) -> Result<String> {
        let model = self.select_model(self.text_model.clone(), CAPABILITY_DESCRIBE)?;
        let Some(provider) = self.providers.get(&model.provider) else {
            bail!("describe provider '{}' not registered", model.provider);
        };
        provider.describe(&DescribeRequest {
            source: snapshot.clone(),
            model: model.name,
            provider_options: self.provider_options.clone(),
        })
    }

    fn emit_description_ready(&self, snapshot: &Snapshot, kind: &str, text: &str) -> Result<()> {
        self.events.emit(
            "description_ready",
            map_object(json!({
                "snapshot_id": snapshot.id,
                "kind": kind,
                "text": text,
            })),
        )?;
        Ok(())
    }

    fn emit_description_failed(
        &self,
        snapshot: &Snapshot,
        kind: &str,
        err: &anyhow::Error,
    ) -> Result<()> {
        warn!(kind, error = %err, "description failed");
        self.events.emit(
            "description_failed",
            map_object(json!({
                "snapshot_id": snapshot.id,
                "kind": kind,
                "error": error_chain_text(err, 1024),
            })),
        )?;
        Ok(())
    }

    fn emit_history_event(&self, event_type: &str, direction: Option<&str>) -> Result<()> {
        let history = self.workspace.history();
        let mut payload = map_object(json!({
            "cursor": history.cursor(),
            "total": history.len(),
            "can_undo": history.can_undo(),
            "can_redo": history.can_redo(),
            "snapshot_id": history.current().map(|snapshot| snapshot.id.clone()),
        }));
        if let Some(direction) = direction {
            payload.insert("direction".to_string(), Value::String(direction.to_string()));
        }
        self.events.emit(event_type, payload)?;
        Ok(())
    }

    fn emit_compare_changed(&self) -> Result<()> {
        let comparison = self.workspace.comparison();
        self.events.emit(
            "compare_changed",
            map_object(json!({
                "mode": self.workspace.compare_mode().as_str(),
                "target": self.workspace.compare_target().as_str(),
                "baseline_snapshot_id": comparison.baseline.map(|snapshot| snapshot.id.clone()),
            })),
        )?;
        Ok(())
    }
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return providers::truncate_text(&err.to_string(), max_chars);
    }
    providers::truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
