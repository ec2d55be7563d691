//! File items.
//!
//! Files are the one item type with a content pipeline: the declared
//! `content` or `source` is rendered into a byte payload, fingerprinted for
//! diffing, staged locally, optionally verified, and uploaded with mode and
//! ownership in a single transfer.

use crate::error::{ConfigError, ItemError};
use crate::item::{
    BuiltinAttributes, Item, ItemId, ItemMeta, ItemStatus, merge_aspects, validate_path_name,
};
use crate::paths::{basename, is_within, parent, quote};
use crate::remote::{PathProbe, PathType, RemoteSession};
use crate::render::{ContentRenderer, ContentType, hash_bytes, hash_local_file};
use crate::schema::{
    AttrValue, AttributeSchema, Attributes, RawAttributes, ensure_delete_exclusive, patch_mode,
    validate_bool, validate_mode,
};
use crate::statedict::{StateDict, StateValue};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tempfile::NamedTempFile;

/// A managed file.
pub struct File {
    meta: ItemMeta,
    attrs: Attributes,
    /// Local directory holding `source` payloads for the owning bundle.
    item_dir: PathBuf,
    renderer: Option<Arc<dyn ContentRenderer>>,
    rendered: OnceLock<Result<Vec<u8>, String>>,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("id", &self.meta.id)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

type FixFn = fn(&File, &mut dyn RemoteSession, &ItemStatus) -> Result<()>;

const FIX_TABLE: &[(&str, FixFn)] = &[
    ("type", File::fix_type),
    ("content", File::fix_content),
    ("mode", File::fix_mode),
    ("owner", File::fix_owner),
    ("group", File::fix_group),
];

fn validate_content_type(
    item: &str,
    bundle: &str,
    attribute: &str,
    value: &AttrValue,
) -> Result<(), ConfigError> {
    let valid = value.as_str().is_some_and(|name| ContentType::parse(name).is_some());
    if !valid {
        return Err(ConfigError::InvalidValue {
            item: item.to_string(),
            bundle: bundle.to_string(),
            attribute: attribute.to_string(),
            reason: format!("must be one of: {}", ContentType::NAMES.join(", ")),
        });
    }
    Ok(())
}

fn validate_encoding(
    item: &str,
    bundle: &str,
    attribute: &str,
    value: &AttrValue,
) -> Result<(), ConfigError> {
    if value.as_str() != Some("utf-8") {
        return Err(ConfigError::InvalidValue {
            item: item.to_string(),
            bundle: bundle.to_string(),
            attribute: attribute.to_string(),
            reason: "only 'utf-8' is supported".to_string(),
        });
    }
    Ok(())
}

impl File {
    pub const KIND: &'static str = "file";

    pub fn from_attributes(
        bundle: &str,
        name: &str,
        raw: RawAttributes,
        builtins: BuiltinAttributes,
        item_dir: &Path,
    ) -> Result<Self, ConfigError> {
        validate_path_name(Self::KIND, bundle, name)?;
        let id = ItemId::new(Self::KIND, name);
        let rendered_id = id.to_string();

        ensure_delete_exclusive(&rendered_id, bundle, &raw)?;
        Self::check_exclusions(&rendered_id, bundle, &raw)?;

        let schema = AttributeSchema::new()
            .attr("content")
            .attr_with_default("content_type", AttrValue::text("text"))
            .attr_with_default("context", AttrValue::Map(BTreeMap::new()))
            .attr_with_default("delete", AttrValue::Bool(false))
            .attr_with_default("encoding", AttrValue::text("utf-8"))
            .attr("group")
            .attr("mode")
            .attr("owner")
            .attr("source")
            .attr("verify_with")
            .validator("content_type", validate_content_type)
            .validator("delete", validate_bool)
            .validator("encoding", validate_encoding)
            .validator("mode", validate_mode);

        let item_basename = basename(name).to_string();
        let attrs = schema.apply(&rendered_id, bundle, raw, move |raw| {
            // A file without explicit content defaults to a source named
            // after its own basename.
            if !raw.contains_key("content")
                && !raw.contains_key("source")
                && raw.get("delete").and_then(AttrValue::as_bool) != Some(true)
                && raw.get("content_type").and_then(AttrValue::as_str) != Some("any")
            {
                raw.insert("source".to_string(), AttrValue::Text(item_basename));
            }
            patch_mode(raw);
        })?;

        Ok(Self {
            meta: ItemMeta::new(id, bundle, builtins),
            attrs,
            item_dir: item_dir.to_path_buf(),
            renderer: None,
            rendered: OnceLock::new(),
        })
    }

    /// Attach the template renderer used for `content_type = "template"`.
    pub fn with_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Mutually exclusive attribute combinations, checked on the raw input
    /// before defaulting fills in anything.
    fn check_exclusions(item: &str, bundle: &str, raw: &RawAttributes) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            item: item.to_string(),
            bundle: bundle.to_string(),
            attribute: "content".to_string(),
            reason: reason.to_string(),
        };
        if raw.contains_key("content") && raw.contains_key("source") {
            return Err(invalid("cannot have both 'content' and 'source'"));
        }
        if raw.get("content_type").and_then(AttrValue::as_str) == Some("any")
            && ["content", "encoding", "source"].iter().any(|a| raw.contains_key(*a))
        {
            return Err(invalid(
                "content_type 'any' must not define 'content', 'encoding' and/or 'source'",
            ));
        }
        Ok(())
    }

    fn delete(&self) -> bool {
        self.attrs.get_bool("delete").unwrap_or(false)
    }

    fn name(&self) -> &str {
        self.meta.id.name()
    }

    fn content_type(&self) -> ContentType {
        self.attrs
            .get_str("content_type")
            .and_then(ContentType::parse)
            .unwrap_or_default()
    }

    /// Local path of the declared `source` payload.
    fn source_path(&self) -> Option<PathBuf> {
        self.attrs.get_str("source").map(|source| self.item_dir.join(source))
    }

    fn rendering_error(&self, reason: impl fmt::Display) -> ItemError {
        ItemError::Rendering {
            item: self.meta.id.to_string(),
            bundle: self.meta.bundle.clone(),
            reason: reason.to_string(),
        }
    }

    /// The declared content or the source file's text. Errors are plain
    /// reasons; callers wrap them into [`ItemError::Rendering`].
    fn template_source(&self) -> Result<String, String> {
        if let Some(path) = self.source_path() {
            return std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read '{}': {e}", path.display()));
        }
        match self.attrs.get_str("content") {
            Some(content) => Ok(content.to_string()),
            None => Ok(String::new()),
        }
    }

    /// The rendered byte payload, computed once.
    fn payload(&self) -> Result<&[u8], ItemError> {
        let cached = self.rendered.get_or_init(|| match self.content_type() {
            ContentType::Any | ContentType::Binary => Ok(Vec::new()),
            ContentType::Text => self.template_source().map(String::into_bytes),
            ContentType::Template => {
                let source = self.template_source()?;
                let context = self.attrs.get_map("context").cloned().unwrap_or_default();
                match &self.renderer {
                    Some(renderer) => {
                        renderer.render(&source, &context).map_err(|e| e.to_string())
                    }
                    None => Err("no template renderer configured".to_string()),
                }
            }
        });
        match cached {
            Ok(bytes) => Ok(bytes),
            Err(reason) => Err(self.rendering_error(reason)),
        }
    }

    fn content_hash(&self) -> Result<String, ItemError> {
        if self.content_type() == ContentType::Binary {
            let path = self
                .source_path()
                .ok_or_else(|| self.rendering_error("binary content requires 'source'"))?;
            return hash_local_file(&path)
                .map_err(|e| self.rendering_error(format!("cannot hash '{}': {e}", path.display())));
        }
        Ok(hash_bytes(self.payload()?))
    }

    /// Stage the payload locally and run the verification hook, if any.
    ///
    /// Must not touch the remote host: a failing hook has to surface before
    /// any partial state change.
    fn stage_local(&self) -> Result<Staged> {
        let staged = if self.content_type() == ContentType::Binary {
            let path = self
                .source_path()
                .ok_or_else(|| self.rendering_error("binary content requires 'source'"))?;
            Staged::Source(path)
        } else {
            let mut tmp = NamedTempFile::new().context("failed to stage payload")?;
            tmp.write_all(self.payload()?).context("failed to stage payload")?;
            tmp.flush().context("failed to stage payload")?;
            Staged::Temp(tmp)
        };

        if let Some(hook) = self.attrs.get_str("verify_with") {
            let command = hook.replace("{}", &quote(&staged.path().to_string_lossy()));
            log::debug!("{}: local verification using `{command}`", self.meta.id);
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .status()
                .context("failed to spawn verification hook")?;
            if !status.success() {
                return Err(ItemError::ValidationHook {
                    item: self.meta.id.to_string(),
                    command,
                }
                .into());
            }
        }
        Ok(staged)
    }

    fn fix_type(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let exists = status.probe.as_ref().is_some_and(|probe| probe.exists);
        if exists {
            session.run(&id, &format!("rm -rf -- {}", quote(self.name())), false)?;
        }
        if self.delete() {
            return Ok(());
        }
        if let Some(dir) = parent(self.name()) {
            session.run(&id, &format!("mkdir -p -- {}", quote(dir)), false)?;
        }
        self.fix_content(session, status)
    }

    /// Upload carries mode and ownership with it, one transfer.
    fn fix_content(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let staged = self.stage_local()?;
        session.upload(
            staged.path(),
            self.name(),
            self.attrs.get_str("mode"),
            self.attrs.get_str("owner"),
            self.attrs.get_str("group"),
        )
    }

    fn fix_mode(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let mode = self.attrs.get_str("mode").unwrap_or_default();
        session.run(&id, &format!("chmod {} -- {}", mode, quote(self.name())), false)?;
        Ok(())
    }

    fn fix_owner(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let owner = self.attrs.get_str("owner").unwrap_or_default();
        let group = match self.attrs.get_str("group") {
            Some(group) => format!(":{}", quote(group)),
            None => String::new(),
        };
        session.run(
            &id,
            &format!("chown {}{} -- {}", quote(owner), group, quote(self.name())),
            false,
        )?;
        Ok(())
    }

    fn fix_group(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        self.fix_owner(session, status)
    }
}

/// A locally staged payload; temp files clean themselves up on drop,
/// binary sources are left alone.
enum Staged {
    Temp(NamedTempFile),
    Source(PathBuf),
}

impl Staged {
    fn path(&self) -> &Path {
        match self {
            Self::Temp(tmp) => tmp.path(),
            Self::Source(path) => path,
        }
    }
}

impl Item for File {
    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn cdict(&self) -> Result<StateDict> {
        if self.delete() {
            return Ok(StateDict::new());
        }
        let mut cdict = StateDict::new();
        cdict.insert("type".to_string(), "file".into());
        if self.content_type() != ContentType::Any {
            cdict.insert("content".to_string(), self.content_hash()?.into());
        }
        for attr in ["mode", "owner", "group"] {
            if let Some(value) = self.attrs.get_str(attr) {
                cdict.insert(attr.to_string(), value.into());
            }
        }
        Ok(cdict)
    }

    fn sdict(&self, session: &mut dyn RemoteSession) -> Result<(StateDict, Option<PathProbe>)> {
        let probe = session.probe(self.name())?;
        if !probe.exists {
            return Ok((StateDict::new(), Some(probe)));
        }
        let mut sdict = StateDict::new();
        if let Some(path_type) = probe.path_type {
            sdict.insert("type".to_string(), path_type.as_str().into());
        }
        if probe.path_type == Some(PathType::File)
            && let Some(hash) = &probe.content_hash
        {
            sdict.insert("content".to_string(), hash.as_str().into());
        }
        for (attr, value) in [("mode", &probe.mode), ("owner", &probe.owner), ("group", &probe.group)]
        {
            if let Some(value) = value {
                sdict.insert(attr.to_string(), value.as_str().into());
            }
        }
        if let Some(size) = probe.size {
            sdict.insert("size".to_string(), StateValue::Int(size as i64));
        }
        Ok((sdict, Some(probe)))
    }

    fn fix(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        for aspect in merge_aspects(&status.needs_fixing) {
            if let Some((_, fix)) = FIX_TABLE.iter().find(|(name, _)| *name == aspect) {
                if self.delete() {
                    log::info!("{}: deleting", self.meta.id);
                } else {
                    log::info!("{}: fixing {aspect}", self.meta.id);
                }
                fix(self, session, status)?;
            }
        }
        Ok(())
    }

    fn auto_deps(&self, items: &[Box<dyn Item>]) -> Result<Vec<String>, ConfigError> {
        let mut deps = Vec::new();
        for other in items {
            let other_meta = other.meta();
            if other_meta.id == self.meta.id {
                continue;
            }
            let kind = other_meta.id.kind();
            let path = other_meta.id.name();
            if kind == "file" && is_within(path, self.name()) {
                return Err(ConfigError::PathCollision {
                    blocker: other_meta.id.to_string(),
                    blocker_bundle: other_meta.bundle.clone(),
                    blocked: self.meta.id.to_string(),
                    blocked_bundle: self.meta.bundle.clone(),
                });
            }
            if (kind == "directory" || kind == "symlink") && is_within(path, self.name()) {
                deps.push(other_meta.id.to_string());
            }
        }
        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, AttrValue)]) -> RawAttributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn file(name: &str, attrs: RawAttributes) -> Result<File, ConfigError> {
        File::from_attributes(
            "base",
            name,
            attrs,
            BuiltinAttributes::default(),
            Path::new("/nonexistent"),
        )
    }

    #[test]
    fn content_and_source_are_mutually_exclusive() {
        let err = file(
            "/etc/motd",
            raw(&[
                ("content", AttrValue::text("hi")),
                ("source", AttrValue::text("motd")),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("both 'content' and 'source'"));
    }

    #[test]
    fn content_type_any_excludes_content_attributes() {
        for attr in ["content", "source", "encoding"] {
            let err = file(
                "/etc/motd",
                raw(&[
                    ("content_type", AttrValue::text("any")),
                    (attr, AttrValue::text("x")),
                ]),
            )
            .unwrap_err();
            assert!(err.to_string().contains("content_type 'any'"), "{attr}: {err}");
        }
    }

    #[test]
    fn source_defaults_to_basename() {
        let item = file("/etc/nginx/nginx.conf", RawAttributes::new()).unwrap();
        assert_eq!(item.attrs.get_str("source"), Some("nginx.conf"));
    }

    #[test]
    fn declared_content_needs_no_source_default() {
        let item = file("/etc/motd", raw(&[("content", AttrValue::text("hi"))])).unwrap();
        assert!(!item.attrs.contains("source"));
    }

    #[test]
    fn unknown_content_type_rejected() {
        let err = file("/etc/motd", raw(&[("content_type", AttrValue::text("jinja2"))])).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn cdict_hashes_declared_content() {
        let item = file(
            "/etc/motd",
            raw(&[("content", AttrValue::text("hello")), ("mode", AttrValue::Int(644))]),
        )
        .unwrap();
        let cdict = item.cdict().unwrap();
        assert_eq!(cdict.get("content"), Some(&hash_bytes(b"hello").into()));
        assert_eq!(cdict.get("mode"), Some(&"0644".into()));
    }

    #[test]
    fn content_type_any_is_never_diffed_for_content() {
        let item = file("/run/flag", raw(&[("content_type", AttrValue::text("any"))])).unwrap();
        let cdict = item.cdict().unwrap();
        assert_eq!(cdict.get("type"), Some(&"file".into()));
        assert!(!cdict.contains_key("content"));
    }

    #[test]
    fn template_without_renderer_fails_rendering() {
        let item = file(
            "/etc/motd",
            raw(&[
                ("content", AttrValue::text("hi ${name}")),
                ("content_type", AttrValue::text("template")),
            ]),
        )
        .unwrap();
        let err = item.cdict().unwrap_err();
        assert!(err.to_string().contains("no template renderer"));
    }
}
