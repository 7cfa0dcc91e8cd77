// This module drives one decoration run over a module. DecoratePass owns the read-only
// configuration (target set, options, support module source) and can be run over any
// number of modules in the same context. A run checks the target triple, discovers
// targets, links and validates the support module, embeds the self snapshot and then
// instruments each target definition in module order: its calls are collected on the
// undecorated body first, then the entry gets landing detection, then the collected calls
// are decorated. The decorated module is retagged with the DRTI triple so the machine-code
// pass picks it up. Skips are reported through PassOutcome and logged; fatal conditions
// come back as DecorateError, after which the module must be discarded.

//! Pass orchestration.

use bumpalo::Bump;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::TargetTriple;

use crate::core::config::{DecorateOptions, TargetSet, DECORATED_TRIPLE, SUPPORTED_TRIPLE};
use crate::core::error::{DecorateError, DecorateResult, LayoutError};
use crate::core::session::{DecorateSession, SessionStats};
use crate::llvm::callsite::{CallCollector, CallSiteInstrumenter};
use crate::llvm::discovery::TargetDiscovery;
use crate::llvm::function_name;
use crate::llvm::landing::LandingInstrumenter;
use crate::llvm::layout::LayoutValidator;
use crate::llvm::probe::ReturnAddressProbe;
use crate::llvm::snapshot::SelfSnapshotBuilder;
use crate::llvm::support::SupportLinker;

/// Landing site created for one target definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingSummary {
    pub function: String,

    /// Ordinals of the decorated calls, ascending.
    pub call_sites: Vec<u32>,
}

/// Everything a successful decoration produced.
#[derive(Debug, Clone)]
pub struct DecorationReport {
    /// Bitcode embedded as `__drti_bitcode`.
    pub snapshot_bitcode: Vec<u8>,

    /// Address table names, by ordinal.
    pub symbols: Vec<String>,

    pub landing_sites: Vec<LandingSummary>,
    pub stats: SessionStats,
}

/// Result of running the pass over one module.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    /// The module targets another platform and was left untouched.
    NotApplicable { triple: String },

    /// No configured target exists in the module.
    NoTargets,

    /// The support module was linked but does not match the expected layout.
    LayoutMismatch(LayoutError),

    Decorated(DecorationReport),
}

impl PassOutcome {
    /// Whether the module was changed.
    pub fn modified(&self) -> bool {
        matches!(self, PassOutcome::LayoutMismatch(_) | PassOutcome::Decorated(_))
    }

    pub fn report(&self) -> Option<&DecorationReport> {
        match self {
            PassOutcome::Decorated(report) => Some(report),
            _ => None,
        }
    }
}

/// The decoration pass.
pub struct DecoratePass<'ctx> {
    context: &'ctx Context,
    targets: TargetSet,
    options: DecorateOptions,
    support: SupportLinker,
}

impl<'ctx> DecoratePass<'ctx> {
    pub fn new(context: &'ctx Context, targets: TargetSet, options: DecorateOptions) -> Self {
        Self {
            context,
            targets,
            options,
            support: SupportLinker::new(),
        }
    }

    /// Use an alternate support module.
    pub fn with_support(mut self, support: SupportLinker) -> Self {
        self.support = support;
        self
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    pub fn options(&self) -> &DecorateOptions {
        &self.options
    }

    /// Decorate `module` in place.
    pub fn run_on_module(&self, module: &Module<'ctx>) -> DecorateResult<PassOutcome> {
        let module_name = module.get_name().to_string_lossy().into_owned();
        let triple = module.get_triple().as_str().to_string_lossy().into_owned();
        if triple != SUPPORTED_TRIPLE {
            log::info!(
                "skipping {}: unsupported target triple '{}'",
                module_name,
                triple
            );
            return Ok(PassOutcome::NotApplicable { triple });
        }

        let probe = ReturnAddressProbe::new(self.options.probe)?;

        let arena = Bump::new();
        let session = DecorateSession::new(&arena);

        let discovery = TargetDiscovery::scan(module, &self.targets);
        session.record_functions_scanned(discovery.scanned(), discovery.definitions().len());
        if !discovery.found() {
            log::debug!("skipping {}: no target functions", module_name);
            return Ok(PassOutcome::NoTargets);
        }

        self.support.link_into(self.context, module)?;

        let support = match LayoutValidator::new(module).validate() {
            Ok(items) => items,
            Err(mismatch) => {
                log::warn!(
                    "skipping {}: support module layout mismatch: {}",
                    module_name,
                    mismatch
                );
                return Ok(PassOutcome::LayoutMismatch(mismatch));
            }
        };

        let snapshot = SelfSnapshotBuilder::new(self.context, module, &support)
            .build(&self.options.listed_globals);
        session.record_snapshot(snapshot.symbols.len(), snapshot.bitcode.len());

        let collector = CallCollector::new(&self.targets, discovery.signatures());
        let landing = LandingInstrumenter::new(
            self.context,
            module,
            &support,
            snapshot.descriptor,
            &probe,
        );
        let callsites = CallSiteInstrumenter::new(self.context, module, &support);

        let mut landing_sites = Vec::with_capacity(discovery.definitions().len());
        for &function in discovery.definitions() {
            let name = function_name(function);

            let calls = collector.collect(&session, function);
            let point = landing.instrument(function)?;
            session.record_landing_site();
            let call_sites = callsites.decorate(&session, function, &point, calls)?;
            landing_sites.push(LandingSummary {
                function: name,
                call_sites,
            });
        }

        module.set_triple(&TargetTriple::create(DECORATED_TRIPLE));

        if self.options.verify {
            module
                .verify()
                .map_err(|e| DecorateError::Verification {
                    reason: e.to_string(),
                })?;
        }

        let stats = session.stats();
        log::info!("decorated {}", module_name);
        log::debug!("{}", stats);

        Ok(PassOutcome::Decorated(DecorationReport {
            snapshot_bitcode: snapshot.bitcode,
            symbols: snapshot.symbols.into_iter().map(|entry| entry.name).collect(),
            landing_sites,
            stats,
        }))
    }
}
