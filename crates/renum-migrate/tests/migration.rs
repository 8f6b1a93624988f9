use std::fs;

use pretty_assertions::assert_eq;
use renum_ident::Identifier;
use renum_migrate::{
    FailureKind, MigrationConfig, MigrationError, MigrationOrchestrator, MigrationPhase, RunMode,
    StructuralError,
};
use renum_test_utils::{signing_key, GenTree, GenTreeBuilder};
use renum_topology::{CertificateChain, KeyRole, TopologyDescriptor, TopologyError};

fn id(realm: u16, member: u64) -> Identifier {
    Identifier::new(realm, member)
}

/// Two realms with one anchor each, a member in each and a cross-realm link
fn two_realm_tree() -> GenTree {
    GenTreeBuilder::new()
        .anchor(1, 11)
        .member(1, 12)
        .member(1, 102)
        .anchor(20, 201)
        .member(20, 202)
        .link(id(1, 11), id(1, 12))
        .link(id(1, 11), id(1, 102))
        .link(id(1, 11), id(20, 201))
        .link(id(20, 201), id(20, 202))
        .build()
}

fn run(tree: &GenTree, mode: RunMode) -> renum_migrate::MigrationReport {
    let mut out = Vec::new();
    MigrationOrchestrator::discover(&MigrationConfig::new(), tree.root())
        .unwrap()
        .run(mode, &mut out)
        .unwrap()
}

#[test]
fn test_full_run_rewrites_tree() {
    let tree = two_realm_tree();
    let report = run(&tree, RunMode::Apply);
    assert!(!report.has_failures());
    assert_eq!(report.identifiers.len(), 5);

    let anchor = TopologyDescriptor::load(&tree.element_dir(id(1, 11))).unwrap();
    assert_eq!(anchor.identifier().standard(), "17-0:1101");
    let names: Vec<_> = anchor.services().iter().map(|s| s.name.to_string()).collect();
    assert_eq!(names, vec!["bs17-0_1101-1", "cs17-0_1101-1", "ps17-0_1101-1"]);

    let member = TopologyDescriptor::load(&tree.element_dir(id(1, 102))).unwrap();
    assert_eq!(member.identifier().standard(), "17-0:110c");

    let text = fs::read_to_string(tree.element_dir(id(20, 202)).join("topology.json")).unwrap();
    assert!(!text.contains("ISD_AS"));
    assert!(text.contains("60-0:3c01"));
}

#[test]
fn test_cross_references_point_at_existing_members() {
    let tree = two_realm_tree();
    run(&tree, RunMode::Apply);

    let members = [id(1, 11), id(1, 12), id(1, 102), id(20, 201), id(20, 202)];
    let descriptors: Vec<_> = members
        .iter()
        .map(|m| TopologyDescriptor::load(&tree.element_dir(*m)).unwrap())
        .collect();
    let own: Vec<_> = descriptors.iter().map(TopologyDescriptor::identifier).collect();

    for descriptor in &descriptors {
        for neighbor in descriptor.neighbors() {
            assert!(own.contains(&neighbor), "dangling reference {}", neighbor.standard());
        }
    }
    let anchor = &descriptors[0];
    assert!(anchor.neighbors().any(|n| n.standard() == "60-0:3c01"));
}

#[test]
fn test_member_chains_verify_against_reissued_anchor() {
    let tree = two_realm_tree();
    run(&tree, RunMode::Apply);

    let anchor_key = signing_key(id(1, 11), KeyRole::TrustAnchorSigning).verifying_key();
    let anchor_chain = tree.chain(id(1, 11));
    assert_eq!(anchor_chain.member.subject, "17-0:1101");
    assert!(anchor_chain.member.is_self_issued());
    assert!(anchor_chain.verify(&anchor_key).is_ok());

    let member_chain = tree.chain(id(1, 12));
    assert_eq!(member_chain.member.subject, "17-0:1102");
    assert_eq!(member_chain.issuer, anchor_chain.member);
    assert!(member_chain.verify(&anchor_key).is_ok());

    let other_key = signing_key(id(20, 201), KeyRole::TrustAnchorSigning).verifying_key();
    assert!(tree.chain(id(20, 202)).verify(&other_key).is_ok());
    assert!(tree.chain(id(20, 202)).verify(&anchor_key).is_err());
}

#[test]
fn test_stale_anchor_certificate_fails_verification() {
    let tree = two_realm_tree();
    let legacy_anchor = tree.chain(id(1, 11)).member;
    run(&tree, RunMode::Apply);

    let reissued = tree.chain(id(1, 12));
    let stale = CertificateChain::new(reissued.member, legacy_anchor);
    let anchor_key = signing_key(id(1, 11), KeyRole::TrustAnchorSigning).verifying_key();
    assert!(matches!(stale.verify(&anchor_key), Err(TopologyError::Signing(_))));
}

#[test]
fn test_dry_run_matches_real_run() {
    let dry_tree = two_realm_tree();
    let before = dry_tree.snapshot();
    let dry = run(&dry_tree, RunMode::DryRun);
    assert_eq!(dry_tree.snapshot(), before);

    let real_tree = two_realm_tree();
    let real = run(&real_tree, RunMode::Apply);

    let strip = |report: &renum_migrate::MigrationReport, root: &std::path::Path| {
        report
            .writes
            .iter()
            .map(|w| (w.path.strip_prefix(root).unwrap().to_path_buf(), w.digest.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&dry, dry_tree.root()), strip(&real, real_tree.root()));

    for write in &real.writes {
        assert_eq!(fs::read_to_string(&write.path).unwrap(), write.contents());
    }
}

#[test]
fn test_second_run_is_rejected_per_member() {
    let tree = two_realm_tree();
    run(&tree, RunMode::Apply);
    let after_first = tree.snapshot();

    let report = run(&tree, RunMode::Apply);
    assert_eq!(report.failures.len(), 5);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Schema));
    assert!(report.writes.is_empty());
    assert_eq!(tree.snapshot(), after_first);
}

#[test]
fn test_signing_error_excludes_only_that_member() {
    let tree = GenTreeBuilder::new()
        .anchor(1, 11)
        .member(1, 12)
        .anchor(2, 21)
        .member(2, 22)
        .without_key(id(2, 21), KeyRole::TrustAnchorSigning)
        .build();

    let report = run(&tree, RunMode::Apply);
    let mut excluded: Vec<_> = report.failures.iter().map(|f| f.member.as_str()).collect();
    excluded.sort_unstable();
    assert_eq!(excluded, vec!["2-21", "2-22"]);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Signing));
    assert!(report
        .failures
        .iter()
        .any(|f| f.phase == MigrationPhase::AnchorsReissued));

    // realm 1 migrated, realm 2 left untouched
    assert_eq!(tree.chain(id(1, 12)).member.subject, "17-0:1102");
    assert_eq!(tree.chain(id(2, 22)).member.subject, "2-22");
}

#[test]
fn test_duplicate_chain_is_structural() {
    let tree = GenTreeBuilder::new().anchor(1, 11).build();
    let certs = tree.element_dir(id(1, 11)).join("certs");
    fs::copy(tree.chain_path(id(1, 11)), certs.join("copy.crt")).unwrap();

    let result = MigrationOrchestrator::discover(&MigrationConfig::new(), tree.root());
    assert!(matches!(
        result,
        Err(MigrationError::Structural(StructuralError::NotUnique { found: 2, .. }))
    ));
}

#[test]
fn test_non_numeric_member_directory_is_structural() {
    let tree = GenTreeBuilder::new().anchor(1, 11).build();
    fs::create_dir(tree.realm_dir(1).join("ASx")).unwrap();

    let result = MigrationOrchestrator::discover(&MigrationConfig::new(), tree.root());
    assert!(matches!(
        result,
        Err(MigrationError::Structural(StructuralError::BadName { .. }))
    ));
}

#[test]
fn test_overlapping_plan_is_fatal() {
    let tree = GenTreeBuilder::new().anchor(44, 441).build();
    let result = MigrationOrchestrator::discover(&MigrationConfig::new(), tree.root())
        .unwrap()
        .run(RunMode::DryRun, &mut Vec::new());
    assert!(matches!(result, Err(MigrationError::Fatal(_))));
}

#[test]
fn test_yaml_members_migrate() {
    let tree = GenTreeBuilder::new()
        .anchor(1, 11)
        .member(1, 12)
        .link(id(1, 11), id(1, 12))
        .yaml(id(1, 12))
        .build();
    let report = run(&tree, RunMode::Apply);
    assert!(!report.has_failures());

    let text = fs::read_to_string(tree.element_dir(id(1, 12)).join("topology.yml")).unwrap();
    assert!(text.contains("br17-0_1102-1"));
    assert!(!tree.element_dir(id(1, 12)).join("topology.json").exists());
}

#[test]
fn test_links_to_late_exclusions_are_excluded_too() {
    let tree = GenTreeBuilder::new()
        .anchor(1, 11)
        .member(1, 12)
        .anchor(2, 21)
        .member(2, 22)
        .anchor(3, 31)
        .member(3, 32)
        .link(id(1, 11), id(1, 12))
        .link(id(1, 11), id(2, 21))
        .link(id(2, 21), id(2, 22))
        .link(id(3, 31), id(3, 32))
        .without_key(id(1, 11), KeyRole::TrustAnchorSigning)
        .build();

    let report = run(&tree, RunMode::Apply);
    let mut excluded: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.member.as_str(), f.kind))
        .collect();
    excluded.sort_unstable_by_key(|(member, _)| *member);
    assert_eq!(
        excluded,
        vec![
            ("1-11", FailureKind::Signing),
            ("1-12", FailureKind::Signing),
            ("2-21", FailureKind::Unresolved),
            ("2-22", FailureKind::Unresolved),
        ]
    );

    let changed: Vec<_> = report.identifiers.iter().map(|c| c.old.as_str()).collect();
    assert_eq!(changed, vec!["3-31", "3-32"]);

    // realm 2 still points at the unmigrated anchor of realm 1, consistently
    let linked = TopologyDescriptor::load(&tree.element_dir(id(2, 21))).unwrap();
    assert_eq!(linked.identifier(), id(2, 21));
    assert!(linked.neighbors().any(|n| n == id(1, 11)));
    assert_eq!(tree.chain(id(2, 22)).member.subject, "2-22");

    let after_first = tree.snapshot();
    let again = run(&tree, RunMode::Apply);
    let kind_of = |member: &str| {
        again
            .failures
            .iter()
            .find(|f| f.member == member)
            .map(|f| f.kind)
    };
    assert_eq!(kind_of("2-21"), Some(FailureKind::Unresolved));
    assert_eq!(kind_of("2-22"), Some(FailureKind::Unresolved));
    assert_eq!(kind_of("3-31"), Some(FailureKind::Schema));
    assert!(again.writes.is_empty());
    assert_eq!(tree.snapshot(), after_first);
}

#[test]
fn test_folded_collision_aborts_run() {
    let tree = GenTreeBuilder::new()
        .anchor(1, 11)
        .member(1, 22)
        .member(1, 32)
        .build();
    let before = tree.snapshot();

    let result = MigrationOrchestrator::discover(&MigrationConfig::new(), tree.root())
        .unwrap()
        .run(RunMode::Apply, &mut Vec::new());
    assert!(matches!(result, Err(MigrationError::Fatal(_))));
    assert_eq!(tree.snapshot(), before);
}
