//! Source state
//!
//! A [`SourceState`] is read once per invocation from the authored source
//! tree, then drives reconciliation. The walk is deterministic
//! (slash-separated lexicographic), interprets control files, resolves
//! duplicates, prunes exact directories, and materializes a target-state
//! entry per managed path on demand.
//!
//! The on-disk source-tree layout (attribute-encoded file names and
//! `.chezmoi*` control files) is compatible with the chezmoi source
//! format, so existing source trees work unchanged.

use crate::attr::{AttrModifier, DirAttributes, FileAttrFlags, FileAttributes, SourceFileKind};
use crate::database::ENTRY_STATE_BUCKET;
use crate::encryption::{EncryptionTool, NullEncryptionTool};
use crate::entry::{
    DestStateEntry, SourceStateDir, SourceStateEntry, SourceStateFile, SourceStateRemove,
    SourceStateRenameDir,
};
use crate::error::{DuplicateTarget, Error, Result};
use crate::format::Format;
use crate::include::IncludeSet;
use crate::lazy::LazyContents;
use crate::patterns::PatternSet;
use crate::system::{DirEntryInfo, FileKind, System};
use crate::target::TargetStateEntry;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::rc::Rc;
use tatami_core::path::{AbsPath, RelPath, SourceRelPath};
use tatami_core::platform::{UNIX_FILE_MODES, process_umask};
use tatami_template::TemplateEngine;

const DATA_NAME: &str = ".chezmoidata";
const IGNORE_NAME: &str = ".chezmoiignore";
const REMOVE_NAME: &str = ".chezmoiremove";
const TEMPLATES_DIR_NAME: &str = ".chezmoitemplates";
const VERSION_NAME: &str = ".chezmoiversion";

static ENGINE_VERSION: Lazy<semver::Version> = Lazy::new(|| {
    env!("CARGO_PKG_VERSION")
        .parse()
        .expect("crate version is valid semver")
});

type TemplateData = serde_json::Map<String, serde_json::Value>;

/// Options for applying the source state to a destination
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Which entry kinds to act on
    pub include: IncludeSet,
    /// Umask masking both comparisons and written modes
    pub umask: u32,
    /// Persist each entry's state after a successful apply
    pub update_state: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            include: IncludeSet::all(),
            umask: process_umask(),
            update_state: false,
        }
    }
}

/// Options for adding destination paths to the source state
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Keep files whose contents are empty
    pub empty: bool,
    /// Encrypt added file contents
    pub encrypt: bool,
    /// Mark added directories as exact
    pub exact: bool,
    /// Mark added files as templates
    pub template: bool,
    /// Which destination entry kinds to add
    pub include: IncludeSet,
    /// Umask for writes into the source tree
    pub umask: u32,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            empty: false,
            encrypt: false,
            exact: false,
            template: false,
            include: IncludeSet::all(),
            umask: process_umask(),
        }
    }
}

/// The source state: one entry per managed target name
///
/// Built once per command invocation, mutated only during
/// [`SourceState::read`], then read-only.
pub struct SourceState {
    entries: BTreeMap<RelPath, SourceStateEntry>,
    system: Rc<dyn System>,
    source_dir: AbsPath,
    dest_dir: AbsPath,
    umask: u32,
    encryption: Rc<dyn EncryptionTool>,
    ignore: PatternSet,
    min_version: Option<semver::Version>,
    template_data: TemplateData,
    priority_template_data: TemplateData,
    template_engine: TemplateEngine,
}

impl SourceState {
    /// Create a source state rooted at `source_dir`, targeting `dest_dir`
    pub fn new(system: Rc<dyn System>, source_dir: AbsPath, dest_dir: AbsPath) -> Self {
        Self {
            entries: BTreeMap::new(),
            system,
            source_dir,
            dest_dir,
            umask: process_umask(),
            encryption: Rc::new(NullEncryptionTool),
            ignore: PatternSet::new(),
            min_version: None,
            template_data: TemplateData::new(),
            priority_template_data: TemplateData::new(),
            template_engine: TemplateEngine::new(),
        }
    }

    /// Set the umask
    #[must_use]
    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask;
        self
    }

    /// Set the encryption tool
    #[must_use]
    pub fn with_encryption_tool(mut self, tool: Rc<dyn EncryptionTool>) -> Self {
        self.encryption = tool;
        self
    }

    /// Set the template engine (options, function table)
    #[must_use]
    pub fn with_template_engine(mut self, engine: TemplateEngine) -> Self {
        self.template_engine = engine;
        self
    }

    /// Merge template data
    #[must_use]
    pub fn with_template_data(mut self, data: TemplateData) -> Self {
        recursive_merge(&mut self.template_data, data);
        recursive_merge(&mut self.template_data, self.priority_template_data.clone());
        self
    }

    /// Merge priority template data, which overrides on every later merge
    #[must_use]
    pub fn with_priority_template_data(mut self, data: TemplateData) -> Self {
        recursive_merge(&mut self.priority_template_data, data);
        recursive_merge(&mut self.template_data, self.priority_template_data.clone());
        self
    }

    /// The source directory
    #[must_use]
    pub fn source_dir(&self) -> &AbsPath {
        &self.source_dir
    }

    /// The destination directory
    #[must_use]
    pub fn dest_dir(&self) -> &AbsPath {
        &self.dest_dir
    }

    /// The configured umask
    #[must_use]
    pub fn umask(&self) -> u32 {
        self.umask
    }

    /// The accumulated template data
    #[must_use]
    pub fn template_data(&self) -> &TemplateData {
        &self.template_data
    }

    /// The minimum engine version required by the source tree
    #[must_use]
    pub fn min_version(&self) -> Option<&semver::Version> {
        self.min_version.as_ref()
    }

    /// Whether `target_name` is suppressed by the ignore set
    #[must_use]
    pub fn ignored(&self, target_name: &str) -> bool {
        self.ignore.match_name(target_name)
    }

    /// The source state entry for `target_name`
    #[must_use]
    pub fn entry(&self, target_name: &RelPath) -> Option<&SourceStateEntry> {
        self.entries.get(target_name)
    }

    /// All entries, keyed by target name
    pub fn entries(&self) -> impl Iterator<Item = (&RelPath, &SourceStateEntry)> {
        self.entries.iter()
    }

    /// All target names in alphabetical order
    #[must_use]
    pub fn target_names(&self) -> Vec<RelPath> {
        self.entries.keys().cloned().collect()
    }

    /// All target names in apply order: `(order, name)` ascending
    #[must_use]
    pub fn sorted_target_names(&self) -> Vec<RelPath> {
        let mut names: Vec<&RelPath> = self.entries.keys().collect();
        names.sort_by(|a, b| {
            let order_a = self.entries[*a].order();
            let order_b = self.entries[*b].order();
            order_a.cmp(&order_b).then_with(|| a.cmp(b))
        });
        names.into_iter().cloned().collect()
    }

    /// Read the source state from the source directory
    ///
    /// A missing source directory yields an empty state. Loading fails on
    /// duplicate targets, unsupported file types, malformed control files,
    /// or a version guard newer than this engine.
    pub fn read(&mut self) -> Result<()> {
        match self.system.lstat(&self.source_dir)? {
            None => return Ok(()),
            Some(info) if info.kind != FileKind::Dir => {
                return Err(Error::NotADirectory {
                    path: self.source_dir.clone(),
                });
            }
            Some(_) => {}
        }

        let mut all: BTreeMap<RelPath, Vec<SourceStateEntry>> = BTreeMap::new();
        self.walk_dir(&SourceRelPath::empty(), &RelPath::empty(), &mut all)?;

        if let Some(required) = &self.min_version {
            if *required > *ENGINE_VERSION {
                return Err(Error::VersionTooLow {
                    current: ENGINE_VERSION.clone(),
                    required: required.clone(),
                });
            }
        }

        // Ignore patterns may be read after the entries they match; apply
        // the final set over everything.
        all.retain(|target_name, _| !self.ignore.match_name(target_name.as_str()));

        // Exact directories delete destination drift.
        let mut removes: Vec<(RelPath, SourceStateEntry)> = Vec::new();
        for (target_name, entries) in &all {
            let [SourceStateEntry::Dir(dir)] = entries.as_slice() else {
                continue;
            };
            if !dir.attrs.exact {
                continue;
            }
            let dest_path = self.dest_dir.join(target_name);
            if self.system.lstat(&dest_path)?.is_none() {
                continue;
            }
            for child in self.system.read_dir(&dest_path)? {
                let child_target = target_name.join_name(&child.name);
                if all.contains_key(&child_target)
                    || self.ignore.match_name(child_target.as_str())
                {
                    continue;
                }
                removes.push((
                    child_target,
                    SourceStateEntry::Remove(SourceStateRemove {
                        source_path: dir.source_path.clone(),
                    }),
                ));
            }
        }
        for (target_name, entry) in removes {
            all.entry(target_name).or_default().push(entry);
        }

        // Duplicate targets are fatal; report them all, deterministically.
        let mut duplicates = Vec::new();
        for (target_name, entries) in &all {
            if entries.len() > 1 {
                let mut source_paths: Vec<String> =
                    entries.iter().map(SourceStateEntry::source_path).collect();
                source_paths.sort();
                duplicates.push(DuplicateTarget {
                    target_name: target_name.to_string(),
                    source_paths,
                });
            }
        }
        if !duplicates.is_empty() {
            return Err(Error::DuplicateTargets { duplicates });
        }

        for (target_name, entries) in all {
            if let Some(entry) = entries.into_iter().next() {
                self.entries.insert(target_name, entry);
            }
        }
        Ok(())
    }

    /// Update every target under `target_dir` to match the source state
    pub fn apply_all(
        &self,
        target_system: &dyn System,
        target_dir: &AbsPath,
        options: &ApplyOptions,
    ) -> Result<()> {
        for target_name in self.sorted_target_names() {
            self.apply_one(target_system, target_dir, &target_name, options)?;
        }
        Ok(())
    }

    /// Update a single target under `target_dir` to match the source state
    pub fn apply_one(
        &self,
        target_system: &dyn System,
        target_dir: &AbsPath,
        target_name: &RelPath,
        options: &ApplyOptions,
    ) -> Result<()> {
        let entry = self
            .entries
            .get(target_name)
            .ok_or_else(|| Error::EntryNotFound {
                target_name: target_name.to_string(),
            })?;
        let target_state_entry = entry.target_state_entry(self)?;
        if !options.include.includes_target(&target_state_entry) {
            return Ok(());
        }
        let target_path = target_dir.join(target_name);
        let dest_state_entry = DestStateEntry::read(target_system, &target_path)?;
        target_state_entry.apply(target_system, &dest_state_entry, options.umask)?;
        if options.update_state {
            let key = target_path.to_string().into_bytes();
            match target_state_entry.entry_state()? {
                Some(entry_state) => {
                    target_system.persistent_state().set(
                        ENTRY_STATE_BUCKET,
                        &key,
                        &serde_json::to_vec(&entry_state)?,
                    )?;
                }
                None => {
                    // An absent target no longer has state worth keeping;
                    // the other stateless kinds leave prior records alone.
                    if matches!(target_state_entry, TargetStateEntry::Absent) {
                        target_system
                            .persistent_state()
                            .delete(ENTRY_STATE_BUCKET, &key)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Force evaluation of every entry, surfacing the first error
    pub fn evaluate(&self) -> Result<()> {
        for target_name in self.sorted_target_names() {
            self.entries[&target_name].evaluate(self)?;
        }
        Ok(())
    }

    /// Add destination paths to the source state
    ///
    /// Each destination entry is encoded into a source name (attributes
    /// derived from its observed permissions and the options) and written
    /// into the source directory through `source_system`, including any
    /// missing parent directories. Re-adding a directory whose encoded
    /// name changed renames it before anything else is written.
    pub fn add(
        &self,
        source_system: &dyn System,
        dest_system: &dyn System,
        dest_paths: &[AbsPath],
        options: &AddOptions,
    ) -> Result<()> {
        let mut sorted_paths: Vec<&AbsPath> = dest_paths.iter().collect();
        sorted_paths.sort();

        let mut new_entries: BTreeMap<RelPath, SourceStateEntry> = BTreeMap::new();
        for dest_path in sorted_paths {
            let target_rel = dest_path.strip_prefix(&self.dest_dir)?;
            if target_rel.is_empty() {
                return Err(Error::NotFound {
                    path: dest_path.as_path().to_path_buf(),
                });
            }
            let dest_entry = DestStateEntry::read(dest_system, dest_path)?;
            if matches!(dest_entry, DestStateEntry::Absent { .. }) {
                return Err(Error::NotFound {
                    path: dest_path.as_path().to_path_buf(),
                });
            }
            if !options.include.includes_dest(&dest_entry) {
                continue;
            }

            let components: Vec<&str> = target_rel.as_str().split('/').collect();
            let (parents, base) = components.split_at(components.len() - 1);
            let base_name = base[0];

            // Resolve the encoded source directory for the parents,
            // creating directory entries for parents the source lacks.
            let mut source_dir_rel = SourceRelPath::empty();
            let mut parent_target = RelPath::empty();
            for component in parents {
                parent_target = parent_target.join_name(component);
                match self.entries.get(&parent_target) {
                    Some(SourceStateEntry::Dir(dir)) => {
                        source_dir_rel = source_dir_rel.join_name(&dir.attrs.base_name());
                    }
                    _ => {
                        let attrs = DirAttributes {
                            name: (*component).to_string(),
                            exact: false,
                            private: false,
                        };
                        source_dir_rel = source_dir_rel.join_name(&attrs.base_name());
                        let source_rel = source_dir_rel.to_rel_path();
                        let source_path = self.source_dir.join(&source_rel);
                        new_entries.entry(source_rel).or_insert_with(|| {
                            SourceStateEntry::Dir(SourceStateDir { source_path, attrs })
                        });
                    }
                }
            }

            match &dest_entry {
                DestStateEntry::Absent { .. } => unreachable!("checked above"),
                DestStateEntry::Dir { perm, .. } => {
                    let attrs = DirAttributes {
                        name: base_name.to_string(),
                        exact: options.exact,
                        private: UNIX_FILE_MODES && (perm & 0o077) == 0,
                    };
                    let encoded = attrs.base_name();
                    let source_rel = source_dir_rel.join_name(&encoded).to_rel_path();
                    let entry = match self.entries.get(&target_rel) {
                        Some(SourceStateEntry::Dir(existing))
                            if existing.attrs.base_name() != encoded =>
                        {
                            SourceStateEntry::RenameDir(SourceStateRenameDir {
                                old_name: existing.attrs.base_name(),
                                new_name: encoded,
                            })
                        }
                        _ => SourceStateEntry::Dir(SourceStateDir {
                            source_path: self.source_dir.join(&source_rel),
                            attrs,
                        }),
                    };
                    new_entries.insert(source_rel, entry);
                }
                DestStateEntry::File { perm, contents, .. } => {
                    let mut flags = FileAttrFlags::empty();
                    flags.set(FileAttrFlags::EMPTY, options.empty);
                    flags.set(FileAttrFlags::ENCRYPTED, options.encrypt);
                    flags.set(
                        FileAttrFlags::EXECUTABLE,
                        UNIX_FILE_MODES && (perm & 0o111) != 0,
                    );
                    flags.set(
                        FileAttrFlags::PRIVATE,
                        UNIX_FILE_MODES && (perm & 0o077) == 0,
                    );
                    flags.set(FileAttrFlags::TEMPLATE, options.template);
                    let attrs = FileAttributes {
                        name: base_name.to_string(),
                        kind: SourceFileKind::File,
                        flags,
                        order: 0,
                    };
                    let contents = contents.contents()?;
                    if contents.is_empty() && !options.empty {
                        continue;
                    }
                    let stored = if options.encrypt {
                        self.encryption.encrypt(contents)?
                    } else {
                        contents.to_vec()
                    };
                    let source_rel = source_dir_rel.join_name(&attrs.base_name()).to_rel_path();
                    let lazy = Rc::new(LazyContents::new(stored));
                    let target = TargetStateEntry::File {
                        contents: Rc::clone(&lazy),
                        perm: 0o666,
                    };
                    new_entries.insert(
                        source_rel.clone(),
                        SourceStateEntry::File(SourceStateFile::with_target_state(
                            self.source_dir.join(&source_rel),
                            attrs,
                            target_rel.clone(),
                            lazy,
                            target,
                        )),
                    );
                }
                DestStateEntry::Symlink { linkname, .. } => {
                    let mut flags = FileAttrFlags::empty();
                    flags.set(FileAttrFlags::TEMPLATE, options.template);
                    let attrs = FileAttributes {
                        name: base_name.to_string(),
                        kind: SourceFileKind::Symlink,
                        flags,
                        order: 0,
                    };
                    let source_rel = source_dir_rel.join_name(&attrs.base_name()).to_rel_path();
                    let lazy = Rc::new(LazyContents::new(
                        linkname.linkname()?.as_bytes().to_vec(),
                    ));
                    let target = TargetStateEntry::File {
                        contents: Rc::clone(&lazy),
                        perm: 0o666,
                    };
                    new_entries.insert(
                        source_rel.clone(),
                        SourceStateEntry::File(SourceStateFile::with_target_state(
                            self.source_dir.join(&source_rel),
                            attrs,
                            target_rel.clone(),
                            lazy,
                            target,
                        )),
                    );
                }
            }
        }

        let add_state = SourceState {
            entries: new_entries,
            system: Rc::clone(&self.system),
            source_dir: self.source_dir.clone(),
            dest_dir: self.dest_dir.clone(),
            umask: options.umask,
            encryption: Rc::clone(&self.encryption),
            ignore: PatternSet::new(),
            min_version: None,
            template_data: TemplateData::new(),
            priority_template_data: TemplateData::new(),
            template_engine: TemplateEngine::new(),
        };
        add_state.apply_all(
            source_system,
            &self.source_dir,
            &ApplyOptions {
                include: IncludeSet::all(),
                umask: options.umask,
                update_state: false,
            },
        )
    }

    /// Change the attributes of existing source entries
    ///
    /// Each destination path names a managed target; the modifiers are
    /// applied to its source entry's attributes and the source file or
    /// directory is renamed to the re-encoded name through
    /// `source_system`. Entries whose encoded name does not change are
    /// left untouched.
    pub fn chattr(
        &self,
        source_system: &dyn System,
        dest_paths: &[AbsPath],
        modifiers: &[AttrModifier],
    ) -> Result<()> {
        let mut sorted_paths: Vec<&AbsPath> = dest_paths.iter().collect();
        sorted_paths.sort();

        for dest_path in sorted_paths {
            let target_rel = dest_path.strip_prefix(&self.dest_dir)?;
            let entry = self
                .entries
                .get(&target_rel)
                .ok_or_else(|| Error::EntryNotFound {
                    target_name: target_rel.to_string(),
                })?;
            let (source_path, new_name) = match entry {
                SourceStateEntry::Dir(dir) => {
                    let mut attrs = dir.attrs.clone();
                    attrs.apply_modifiers(modifiers);
                    (&dir.source_path, attrs.base_name())
                }
                SourceStateEntry::File(file) => {
                    let mut attrs = file.attrs.clone();
                    attrs.apply_modifiers(modifiers);
                    (&file.source_path, attrs.base_name())
                }
                // Removes and renames have no attribute-carrying source
                // entry of their own.
                SourceStateEntry::Remove(_) | SourceStateEntry::RenameDir(_) => {
                    return Err(Error::EntryNotFound {
                        target_name: target_rel.to_string(),
                    });
                }
            };
            if source_path.file_name() == Some(new_name.as_str()) {
                continue;
            }
            let parent = source_path.parent().ok_or_else(|| Error::NotFound {
                path: source_path.as_path().to_path_buf(),
            })?;
            source_system.rename(source_path, &parent.join_name(&new_name))?;
        }
        Ok(())
    }

    /// Render template `data` against the accumulated template data
    pub fn execute_template(&self, name: &str, data: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(data).map_err(|_| Error::InvalidUtf8 {
            path: name.to_string(),
        })?;
        let context = serde_json::Value::Object(self.template_data.clone());
        let rendered = self.template_engine.render(name, text, &context)?;
        Ok(rendered.into_bytes())
    }

    fn source_abs(&self, source_rel: &SourceRelPath) -> AbsPath {
        self.source_dir.join(&source_rel.to_rel_path())
    }

    fn walk_dir(
        &mut self,
        source_rel: &SourceRelPath,
        target_dir: &RelPath,
        all: &mut BTreeMap<RelPath, Vec<SourceStateEntry>>,
    ) -> Result<()> {
        let dir_path = self.source_abs(source_rel);
        let mut dir_entries = self.system.read_dir(&dir_path)?;
        dir_entries.sort_by(|a, b| a.name.cmp(&b.name));

        for DirEntryInfo { name, mut info } in dir_entries {
            let source_path = dir_path.join_name(&name);

            // The source may be assembled via symlinks; follow them before
            // classification.
            if info.kind == FileKind::Symlink {
                info = self
                    .system
                    .stat(&source_path)?
                    .ok_or_else(|| Error::NotFound {
                        path: source_path.as_path().to_path_buf(),
                    })?;
            }

            if name.starts_with(DATA_NAME) && info.kind == FileKind::File {
                self.add_template_data(&source_path, &name)?;
                continue;
            }
            if name == IGNORE_NAME {
                let data = self.execute_template_file(&source_path)?;
                parse_patterns(&mut self.ignore, &data, target_dir, &source_path)?;
                continue;
            }
            if name == REMOVE_NAME {
                self.add_remove_entries(&source_path, target_dir, all)?;
                continue;
            }
            if name == TEMPLATES_DIR_NAME && info.kind == FileKind::Dir {
                self.add_templates_dir(&source_path, &SourceRelPath::empty())?;
                continue;
            }
            if name == VERSION_NAME {
                self.add_version_file(&source_path)?;
                continue;
            }
            if name.starts_with('.') {
                // Unrecognized dot entries (and their subtrees) are not
                // part of the source state.
                continue;
            }

            match info.kind {
                FileKind::Dir => {
                    let attrs = DirAttributes::parse(&name);
                    let target_name = target_dir.join_name(&attrs.name);
                    if !self.ignore.match_name(target_name.as_str()) {
                        all.entry(target_name.clone()).or_default().push(
                            SourceStateEntry::Dir(SourceStateDir {
                                source_path: source_path.clone(),
                                attrs,
                            }),
                        );
                    }
                    self.walk_dir(&source_rel.join_name(&name), &target_name, all)?;
                }
                FileKind::File => {
                    let attrs = FileAttributes::parse(&name);
                    let target_name = target_dir.join_name(&attrs.name);
                    if self.ignore.match_name(target_name.as_str()) {
                        continue;
                    }
                    let entry =
                        self.new_source_state_file(source_path, attrs, target_name.clone());
                    all.entry(target_name).or_default().push(entry);
                }
                kind => {
                    return Err(Error::UnsupportedFileType {
                        path: source_path,
                        found: kind.type_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn new_source_state_file(
        &self,
        source_path: AbsPath,
        attrs: FileAttributes,
        target_name: RelPath,
    ) -> SourceStateEntry {
        let system = Rc::clone(&self.system);
        let encryption = Rc::clone(&self.encryption);
        let encrypted = attrs.is_encrypted();
        let read_path = source_path.clone();
        let contents = Rc::new(LazyContents::from_fn(move || {
            let contents = system.read_file(&read_path)?;
            if encrypted {
                encryption.decrypt(&read_path.to_string(), &contents)
            } else {
                Ok(contents)
            }
        }));
        SourceStateEntry::File(SourceStateFile::new(
            source_path,
            attrs,
            target_name,
            contents,
        ))
    }

    fn add_template_data(&mut self, source_path: &AbsPath, name: &str) -> Result<()> {
        let ext = name
            .strip_prefix(DATA_NAME)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or("");
        let Some(format) = Format::from_extension(ext) else {
            return Err(Error::Parse {
                context: source_path.to_string(),
                message: "unknown format".to_string(),
            });
        };
        let data = self.system.read_file(source_path)?;
        let value: serde_json::Value = format.decode(&data).map_err(|e| Error::Parse {
            context: source_path.to_string(),
            message: e.to_string(),
        })?;
        let serde_json::Value::Object(map) = value else {
            return Err(Error::Parse {
                context: source_path.to_string(),
                message: "expected a map at the top level".to_string(),
            });
        };
        recursive_merge(&mut self.template_data, map);
        recursive_merge(&mut self.template_data, self.priority_template_data.clone());
        Ok(())
    }

    fn add_remove_entries(
        &mut self,
        source_path: &AbsPath,
        target_dir: &RelPath,
        all: &mut BTreeMap<RelPath, Vec<SourceStateEntry>>,
    ) -> Result<()> {
        let data = self.execute_template_file(source_path)?;
        let mut remove_patterns = PatternSet::new();
        parse_patterns(&mut remove_patterns, &data, target_dir, source_path)?;
        let prefix = format!("{}/", self.dest_dir);
        let matches = remove_patterns.glob(self.system.as_ref(), &prefix)?;
        for matched in matches {
            if self.ignore.match_name(&matched) {
                continue;
            }
            let target_name = RelPath::new(matched)?;
            all.entry(target_name)
                .or_default()
                .push(SourceStateEntry::Remove(SourceStateRemove {
                    source_path: source_path.clone(),
                }));
        }
        Ok(())
    }

    fn add_templates_dir(
        &mut self,
        dir_path: &AbsPath,
        template_rel: &SourceRelPath,
    ) -> Result<()> {
        let mut dir_entries = self.system.read_dir(dir_path)?;
        dir_entries.sort_by(|a, b| a.name.cmp(&b.name));
        for DirEntryInfo { name, mut info } in dir_entries {
            let path = dir_path.join_name(&name);
            if info.kind == FileKind::Symlink {
                info = self.system.stat(&path)?.ok_or_else(|| Error::NotFound {
                    path: path.as_path().to_path_buf(),
                })?;
            }
            match info.kind {
                FileKind::File => {
                    let contents = self.system.read_file(&path)?;
                    let text = std::str::from_utf8(&contents).map_err(|_| Error::InvalidUtf8 {
                        path: path.to_string(),
                    })?;
                    let template_name = template_rel.join_name(&name);
                    self.template_engine
                        .add_partial(template_name.as_str(), text)?;
                }
                FileKind::Dir => {
                    self.add_templates_dir(&path, &template_rel.join_name(&name))?;
                }
                kind => {
                    return Err(Error::UnsupportedFileType {
                        path,
                        found: kind.type_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn add_version_file(&mut self, source_path: &AbsPath) -> Result<()> {
        let data = self.system.read_file(source_path)?;
        let text = String::from_utf8_lossy(&data);
        let version: semver::Version = text.trim().parse().map_err(|e| Error::Parse {
            context: source_path.to_string(),
            message: format!("{e}"),
        })?;
        match &self.min_version {
            Some(current) if *current >= version => {}
            _ => self.min_version = Some(version),
        }
        Ok(())
    }

    fn execute_template_file(&self, source_path: &AbsPath) -> Result<Vec<u8>> {
        let data = self.system.read_file(source_path)?;
        self.execute_template(&source_path.to_string(), &data)
    }
}

impl std::fmt::Debug for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceState")
            .field("source_dir", &self.source_dir)
            .field("dest_dir", &self.dest_dir)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Deep-merge `src` into `dest`; non-map values overwrite
fn recursive_merge(dest: &mut TemplateData, src: TemplateData) {
    for (key, value) in src {
        match (dest.get_mut(&key), value) {
            (Some(serde_json::Value::Object(dest_map)), serde_json::Value::Object(src_map)) => {
                recursive_merge(dest_map, src_map);
            }
            (_, value) => {
                dest.insert(key, value);
            }
        }
    }
}

/// Parse ignore/remove pattern lines into a pattern set
///
/// Comments start at `#`, blank lines are skipped, a leading `!` inverts,
/// and patterns are joined with `dir` to produce target-name patterns.
fn parse_patterns(
    patterns: &mut PatternSet,
    data: &[u8],
    dir: &RelPath,
    source_path: &AbsPath,
) -> Result<()> {
    let text = String::from_utf8_lossy(data);
    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let (include, pattern) = match line.strip_prefix('!') {
            Some(rest) => (false, rest),
            None => (true, line),
        };
        let joined = dir.join_name(pattern);
        patterns
            .add(joined.as_str(), include)
            .map_err(|e| Error::Parse {
                context: format!("{source_path}:{line_number}"),
                message: e.to_string(),
            })?;
    }
    Ok(())
}
