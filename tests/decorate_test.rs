//! End-to-end tests for the decoration pass.

use drti_decorate::core::{
    DecorateError, DecorateOptions, LayoutError, TargetSet, TargetSpecification,
    DECORATED_TRIPLE,
};
use drti_decorate::llvm::{parse_module, DecoratePass, LandingSummary, PassOutcome, SupportLinker};
use inkwell::context::Context;
use inkwell::values::AnyValue;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const HOT_FN_IR: &str = r#"
target datalayout = "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
target triple = "x86_64-unknown-linux-gnu"

declare i32 @helper(i32)

define i32 @hot_fn(i32 %x) {
entry:
  %r = call i32 @helper(i32 %x)
  ret i32 %r
}
"#;

const DISPATCH_IR: &str = r#"
target datalayout = "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
target triple = "x86_64-unknown-linux-gnu"

declare i32 @puts(ptr)
declare i32 @handler(ptr)

define i32 @dispatch(ptr %fp, ptr %s) {
entry:
  %a = call i32 @puts(ptr %s)
  %b = call i32 %fp(ptr %s)
  %c = add i32 %a, %b
  ret i32 %c
}
"#;

fn targets(names: &[&str]) -> TargetSet {
    TargetSet::from_names(names.iter().copied()).unwrap()
}

fn verifying() -> DecorateOptions {
    DecorateOptions {
        verify: true,
        ..DecorateOptions::default()
    }
}

#[test]
fn test_hot_fn_calling_target_helper() {
    init_logging();

    let context = Context::create();
    let module = parse_module(&context, HOT_FN_IR, "hot_fn").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["hot_fn", "helper"]), verifying())
        .run_on_module(&module)
        .unwrap();

    assert!(outcome.modified());
    let report = outcome.report().unwrap();
    assert_eq!(
        report.landing_sites,
        vec![LandingSummary {
            function: "hot_fn".to_string(),
            call_sites: vec![0],
        }]
    );
    assert_eq!(report.stats.landing_sites, 1);
    assert_eq!(report.stats.calls_decorated, 1);

    let printed = module.print_to_string().to_string();
    assert!(printed.contains(&format!("target triple = \"{}\"", DECORATED_TRIPLE)));
    assert!(printed.contains("@__drti_self"));
    assert!(printed.contains("@_drti_landing_hot_fn"));
    assert!(printed.contains("@_drti_callsite_hot_fn"));
    assert!(printed.contains("call ptr @_drti_call_from(ptr @_drti_callsite_hot_fn"));
    assert!(printed.contains("call void @_drti_set_caller(ptr %drtiNode)"));
    assert!(printed.contains("notail call i32 %drtiTarget(i32 %x)"));
    assert!(!printed.contains("call i32 @helper"));
    assert!(module.verify().is_ok());
}

#[test]
fn test_direct_call_to_non_target_is_left_alone() {
    init_logging();

    let context = Context::create();
    let module = parse_module(&context, HOT_FN_IR, "hot_fn").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["hot_fn"]), verifying())
        .run_on_module(&module)
        .unwrap();

    // hot_fn still lands, but helper is known and not a target.
    let report = outcome.report().unwrap();
    assert_eq!(report.landing_sites[0].call_sites, Vec::<u32>::new());
    assert_eq!(report.stats.calls_scanned, 1);

    let printed = module.print_to_string().to_string();
    assert!(printed.contains("call i32 @helper(i32 %x)"));
    assert!(!printed.contains("@_drti_callsite_hot_fn"));
    assert!(printed.contains("@_drti_landing_hot_fn"));
}

#[test]
fn test_indirect_call_with_target_signature() {
    init_logging();

    let context = Context::create();
    let module = parse_module(&context, DISPATCH_IR, "dispatch").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["dispatch", "handler"]), verifying())
        .run_on_module(&module)
        .unwrap();

    // puts shares the signature but is a direct non-target; it still takes ordinal 0.
    let report = outcome.report().unwrap();
    assert_eq!(report.landing_sites[0].function, "dispatch");
    assert_eq!(report.landing_sites[0].call_sites, vec![1]);

    let printed = module.print_to_string().to_string();
    assert!(printed.contains("call i32 @puts(ptr %s)"));
    assert!(printed.contains("ptr %drtiCallerTreenode, ptr %fp)"));
    assert!(printed.contains("notail call i32 %drtiTarget(ptr %s)"));
}

#[test]
fn test_target_without_calls_still_lands() {
    init_logging();

    let ir = r#"
target triple = "x86_64-unknown-linux-gnu"

define void @lonely() {
entry:
  ret void
}
"#;
    let context = Context::create();
    let module = parse_module(&context, ir, "lonely").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["lonely"]), verifying())
        .run_on_module(&module)
        .unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(
        report.landing_sites,
        vec![LandingSummary {
            function: "lonely".to_string(),
            call_sites: vec![],
        }]
    );

    let lonely = module.get_function("lonely").unwrap();
    assert_eq!(lonely.count_basic_blocks(), 4);
    let printed = lonely.print_to_string().to_string();
    assert!(printed.contains("@llvm.returnaddress"));
    assert!(printed.contains("call void @_drti_landed(ptr @_drti_landing_lonely"));
}

#[test]
fn test_unsupported_triple_is_untouched() {
    init_logging();

    let ir = HOT_FN_IR.replace("x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu");
    let context = Context::create();
    let module = parse_module(&context, &ir, "arm").unwrap();
    let before = module.print_to_string().to_string();

    let outcome = DecoratePass::new(&context, targets(&["hot_fn"]), DecorateOptions::default())
        .run_on_module(&module)
        .unwrap();

    match &outcome {
        PassOutcome::NotApplicable { triple } => assert_eq!(triple, "aarch64-unknown-linux-gnu"),
        other => panic!("expected NotApplicable, got {:?}", other),
    }
    assert!(!outcome.modified());
    assert_eq!(module.print_to_string().to_string(), before);
}

#[test]
fn test_no_targets_in_module() {
    init_logging();

    let context = Context::create();
    let module = parse_module(&context, HOT_FN_IR, "hot_fn").unwrap();
    let before = module.print_to_string().to_string();

    let outcome = DecoratePass::new(&context, targets(&["elsewhere"]), DecorateOptions::default())
        .run_on_module(&module)
        .unwrap();

    assert!(matches!(outcome, PassOutcome::NoTargets));
    assert!(!outcome.modified());
    assert_eq!(module.print_to_string().to_string(), before);
    assert!(module.get_global("__drti_self").is_none());
}

#[test]
fn test_layout_mismatch_links_but_does_not_decorate() {
    init_logging();

    let support = r#"
target datalayout = "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
target triple = "x86_64-unknown-linux-gnu"

%"struct.drti::reflect" = type { ptr, i64, ptr, i64 }
%"struct.drti::landing_site" = type { i32, ptr, ptr, ptr }
%"struct.drti::static_callsite" = type { i64, ptr, i32, [3 x ptr] }
%"struct.drti::treenode" = type { ptr, ptr, ptr, i64, ptr, ptr }

define weak_odr void @_drti_landed(ptr %site, ptr %caller) {
entry:
  ret void
}

define weak_odr ptr @_drti_call_from(ptr %callsite, ptr %caller, ptr %target) {
entry:
  ret ptr null
}
"#;
    let context = Context::create();
    let module = parse_module(&context, HOT_FN_IR, "hot_fn").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["hot_fn"]), DecorateOptions::default())
        .with_support(SupportLinker::from_source(support))
        .run_on_module(&module)
        .unwrap();

    match &outcome {
        PassOutcome::LayoutMismatch(LayoutError::FieldType { record, field, .. }) => {
            assert_eq!(*record, "struct.drti::landing_site");
            assert_eq!(*field, "total_called");
        }
        other => panic!("expected LayoutMismatch, got {:?}", other),
    }
    assert!(outcome.modified());
    assert!(module.get_function("_drti_landed").is_some());
    assert!(module.get_global("__drti_self").is_none());
    assert!(module.get_global("_drti_landing_hot_fn").is_none());
    assert_eq!(
        module.get_triple().as_str().to_str().unwrap(),
        "x86_64-unknown-linux-gnu"
    );
}

#[test]
fn test_link_conflict_is_fatal() {
    init_logging();

    let ir = format!("{}\ndefine void @clash() {{\nentry:\n  ret void\n}}\n", HOT_FN_IR);
    let support = format!(
        "{}\ndefine void @clash() {{\nentry:\n  ret void\n}}\n",
        drti_decorate::llvm::SUPPORT_IR
    );
    let context = Context::create();
    let module = parse_module(&context, &ir, "clash").unwrap();

    let result = DecoratePass::new(&context, targets(&["hot_fn"]), DecorateOptions::default())
        .with_support(SupportLinker::from_source(support))
        .run_on_module(&module);

    assert!(matches!(result, Err(DecorateError::LinkConflict { .. })));
}

#[test]
fn test_missing_configuration_is_fatal() {
    let err = TargetSpecification::new(None, None).resolve().unwrap_err();

    assert!(matches!(err, DecorateError::NoTargetsConfigured { .. }));
    assert!(err.to_string().contains("DRTI_TARGET_NAMES"));
    assert!(err.to_string().contains("DRTI_TARGETS_FILE"));
}

#[test]
fn test_each_target_definition_gets_its_own_records() {
    init_logging();

    let ir = r#"
target triple = "x86_64-unknown-linux-gnu"

define i32 @leaf(i32 %x) {
entry:
  ret i32 %x
}

define i32 @middle(i32 %x) {
entry:
  %a = call i32 @leaf(i32 %x)
  %b = call i32 @leaf(i32 %a)
  ret i32 %b
}
"#;
    let context = Context::create();
    let module = parse_module(&context, ir, "pair").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["leaf", "middle"]), verifying())
        .run_on_module(&module)
        .unwrap();

    let report = outcome.report().unwrap();
    let summary: Vec<(&str, &[u32])> = report
        .landing_sites
        .iter()
        .map(|site| (site.function.as_str(), site.call_sites.as_slice()))
        .collect();
    assert_eq!(summary, vec![("leaf", &[][..]), ("middle", &[0, 1][..])]);
    assert_eq!(report.stats.target_definitions, 2);
    assert_eq!(report.stats.calls_decorated, 2);
    assert!(module.get_global("_drti_landing_leaf").is_some());
    assert!(module.get_global("_drti_landing_middle").is_some());
}

#[test]
fn test_invoke_through_target_signature_is_decorated() {
    init_logging();

    let ir = r#"
target datalayout = "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
target triple = "x86_64-unknown-linux-gnu"

declare i32 @worker(i32)
declare i32 @__gxx_personality_v0(...)

define i32 @guarded(ptr %fp, i32 %x) personality ptr @__gxx_personality_v0 {
entry:
  %r = invoke i32 %fp(i32 %x)
          to label %ok unwind label %lp

ok:
  ret i32 %r

lp:
  %pad = landingpad { ptr, i32 }
          cleanup
  resume { ptr, i32 } %pad
}
"#;
    let context = Context::create();
    let module = parse_module(&context, ir, "guarded").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["guarded", "worker"]), verifying())
        .run_on_module(&module)
        .unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(
        report.landing_sites,
        vec![LandingSummary {
            function: "guarded".to_string(),
            call_sites: vec![0],
        }]
    );
    assert!(module.verify().is_ok());

    let printed = module.get_function("guarded").unwrap().print_to_string().to_string();
    assert!(printed.contains("ptr %drtiCallerTreenode, ptr %fp)"));
    assert!(printed.contains("invoke i32 %drtiTarget(i32 %x)"));
    assert!(!printed.contains("invoke i32 %fp"));
    assert!(!printed.contains("notail"));
}

#[test]
fn test_declared_only_target_is_snapshotted_without_landing_sites() {
    init_logging();

    let ir = r#"
target datalayout = "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
target triple = "x86_64-unknown-linux-gnu"

declare i32 @remote(i32)

define i32 @local(i32 %x) {
entry:
  %r = call i32 @remote(i32 %x)
  ret i32 %r
}
"#;
    let context = Context::create();
    let module = parse_module(&context, ir, "remote").unwrap();

    let outcome = DecoratePass::new(&context, targets(&["remote"]), verifying())
        .run_on_module(&module)
        .unwrap();

    let report = match &outcome {
        PassOutcome::Decorated(report) => report,
        other => panic!("expected Decorated, got {:?}", other),
    };
    assert!(report.landing_sites.is_empty());
    assert_eq!(report.stats.target_definitions, 0);
    assert!(report.symbols.contains(&"remote".to_string()));

    assert!(module.get_global("__drti_self").is_some());
    assert!(module.get_function("_drti_landed").is_some());
    assert_eq!(
        module.get_triple().as_str().to_str().unwrap(),
        DECORATED_TRIPLE
    );

    // local is not a target, so its call stays as written.
    let printed = module.get_function("local").unwrap().print_to_string().to_string();
    assert!(printed.contains("call i32 @remote(i32 %x)"));
    assert!(!printed.contains("_drti_call_from"));
}
