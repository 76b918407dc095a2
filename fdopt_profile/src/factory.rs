//! Multi-file profile ingest.
//!
//! The factory opens each input, reads its record stream, and dispatches by
//! record kind: raw trials accumulate into per-kind "from-singles"
//! profiles, pre-combined profiles deserialize onto per-kind lists. After
//! all inputs are consumed, each kind's accumulator is built (if it saw any
//! trials) and merged with the pre-combined instances into a single final
//! profile per kind, surrendered through the single-consumption `take_*`
//! methods.
//!
//! A file that cannot be opened fails the whole build; a malformed record
//! aborts that file's ingest with a diagnostic and the factory continues
//! with the remaining inputs.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::rc::Rc;

use fdopt_ir::Module;

use crate::call::{CallStructure, CombinedCallProfile};
use crate::edge::CombinedEdgeProfile;
use crate::edt::EdgeDominatorTree;
use crate::io::{align4_padding, ProfileError, ProfileReader, ProfileResult, RecordTag};
use crate::path::{CombinedPathProfile, PathNumbering, UniformNumbering};
use crate::profile::{CombinedProfile, DEFAULT_BINS};

pub struct ProfileFactory<'m> {
    module: &'m Module,
    bin_count: u32,
    numbering: Box<dyn PathNumbering>,

    edt: Option<EdgeDominatorTree>,
    structure: Option<Rc<CallStructure>>,

    edge_acc: Option<CombinedEdgeProfile>,
    path_acc: Option<CombinedPathProfile>,
    call_acc: Option<CombinedCallProfile>,

    edge_list: Vec<CombinedProfile>,
    path_list: Vec<CombinedProfile>,
    call_list: Vec<CombinedProfile>,

    edge_cp: Option<CombinedEdgeProfile>,
    path_cp: Option<CombinedPathProfile>,
    call_cp: Option<CombinedCallProfile>,
}

impl<'m> ProfileFactory<'m> {
    pub fn new(module: &'m Module) -> Self {
        ProfileFactory {
            module,
            bin_count: DEFAULT_BINS,
            numbering: Box::new(UniformNumbering),
            edt: None,
            structure: None,
            edge_acc: None,
            path_acc: None,
            call_acc: None,
            edge_list: Vec::new(),
            path_list: Vec::new(),
            call_list: Vec::new(),
            edge_cp: None,
            path_cp: None,
            call_cp: None,
        }
    }

    pub fn with_bin_count(mut self, bins: u32) -> Self {
        self.bin_count = bins.max(1);
        self
    }

    pub fn with_numbering(mut self, numbering: Box<dyn PathNumbering>) -> Self {
        self.numbering = numbering;
        self
    }

    /// The edge dominator tree, built lazily on the first edge record.
    pub fn edt(&mut self) -> &EdgeDominatorTree {
        if self.edt.is_none() {
            self.edt = Some(EdgeDominatorTree::new(self.module));
        }
        self.edt.as_ref().unwrap()
    }

    fn call_structure(&mut self) -> Rc<CallStructure> {
        if self.structure.is_none() {
            self.structure = Some(CallStructure::build(self.module));
        }
        Rc::clone(self.structure.as_ref().unwrap())
    }

    /// Ingest every input, then build the final per-kind profiles.
    pub fn build_profiles<P: AsRef<Path>>(&mut self, inputs: &[P]) -> ProfileResult<()> {
        for input in inputs {
            let path = input.as_ref();
            let file = File::open(path)?;
            let mut reader = ProfileReader::new(BufReader::new(file));
            if let Err(e) = self.ingest(&mut reader) {
                tracing::error!(file = %path.display(), error = %e, "profile ingest aborted");
            }
        }
        self.finalize();
        Ok(())
    }

    /// Read records from one stream until end of input.
    pub fn ingest<R: Read>(&mut self, r: &mut ProfileReader<R>) -> ProfileResult<()> {
        while let Some(raw_tag) = r.read_tag()? {
            let tag = RecordTag::from_u32(raw_tag).ok_or_else(|| {
                ProfileError::Format(format!("bad profiling file header: unknown tag {raw_tag}"))
            })?;
            self.dispatch(tag, r)?;
        }
        Ok(())
    }

    fn dispatch<R: Read>(&mut self, tag: RecordTag, r: &mut ProfileReader<R>) -> ProfileResult<()> {
        match tag {
            RecordTag::Argument => {
                // a trial's saved command line; skipped with alignment
                let len = r.read_u32()? as usize;
                let bytes = r.read_bytes(len)?;
                r.skip(align4_padding(len))?;
                tracing::debug!(args = %String::from_utf8_lossy(&bytes), "trial arguments");
            }
            RecordTag::Edge => {
                if self.edt.is_none() {
                    self.edt = Some(EdgeDominatorTree::new(self.module));
                }
                let edt = self.edt.as_ref().unwrap();
                if self.edge_acc.is_none() {
                    self.edge_acc = Some(CombinedEdgeProfile::new(edt.edge_count()));
                }
                self.edge_acc.as_mut().unwrap().add_profile(r, edt)?;
            }
            RecordTag::Path => {
                let acc = self.path_acc.get_or_insert_with(CombinedPathProfile::new);
                acc.add_profile(r, self.numbering.as_ref())?;
            }
            RecordTag::Call => {
                let structure = self.call_structure();
                let acc = self
                    .call_acc
                    .get_or_insert_with(|| CombinedCallProfile::new(structure));
                acc.add_profile(r)?;
            }
            RecordTag::CombinedEdge => {
                if self.edt.is_none() {
                    self.edt = Some(EdgeDominatorTree::new(self.module));
                }
                let edges = self.edt.as_ref().unwrap().edge_count();
                let cp = CombinedEdgeProfile::deserialize(r, edges)?;
                self.edge_list.push(CombinedProfile::Edge(cp));
            }
            RecordTag::CombinedPath => {
                let cp = CombinedPathProfile::deserialize(r)?;
                self.path_list.push(CombinedProfile::Path(cp));
            }
            RecordTag::CombinedCall => {
                let structure = self.call_structure();
                let cp = CombinedCallProfile::deserialize(r, structure)?;
                self.call_list.push(CombinedProfile::Call(cp));
            }
        }
        Ok(())
    }

    /// Build each kind's accumulator and merge it with the pre-combined
    /// instances into the final profile.
    pub fn finalize(&mut self) {
        if let Some(mut acc) = self.edge_acc.take() {
            if acc.core().total_weight() > 0.0 {
                acc.core_mut().build_histograms(self.bin_count);
                self.edge_list.insert(0, CombinedProfile::Edge(acc));
            }
        }
        if !self.edge_list.is_empty() {
            let mut merged = CombinedEdgeProfile::new(0);
            merged.build_from_list(&self.edge_list, self.bin_count);
            self.edge_cp = Some(merged);
        }

        if let Some(mut acc) = self.path_acc.take() {
            if acc.core().total_weight() > 0.0 {
                acc.core_mut().build_histograms(self.bin_count);
                self.path_list.insert(0, CombinedProfile::Path(acc));
            }
        }
        if !self.path_list.is_empty() {
            let mut merged = CombinedPathProfile::new();
            merged.build_from_list(&self.path_list, self.bin_count);
            self.path_cp = Some(merged);
        }

        if let Some(mut acc) = self.call_acc.take() {
            if acc.core().total_weight() > 0.0 {
                acc.core_mut().build_histograms(self.bin_count);
                self.call_list.insert(0, CombinedProfile::Call(acc));
            }
        }
        if !self.call_list.is_empty() {
            let structure = self.call_structure();
            let mut merged = CombinedCallProfile::new(structure);
            merged.build_from_list(&self.call_list, self.bin_count);
            self.call_cp = Some(merged);
        }
    }

    pub fn has_edge_cp(&self) -> bool {
        self.edge_cp.is_some()
    }

    pub fn has_path_cp(&self) -> bool {
        self.path_cp.is_some()
    }

    pub fn has_call_cp(&self) -> bool {
        self.call_cp.is_some()
    }

    /// Surrender the final edge profile; a profile can be taken once.
    pub fn take_edge_cp(&mut self) -> Option<CombinedEdgeProfile> {
        self.edge_cp.take()
    }

    pub fn take_path_cp(&mut self) -> Option<CombinedPathProfile> {
        self.path_cp.take()
    }

    pub fn take_call_cp(&mut self) -> Option<CombinedCallProfile> {
        self.call_cp.take()
    }
}
