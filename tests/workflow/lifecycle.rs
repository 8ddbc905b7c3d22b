//! Dataset lifecycle across branches, tags, drafts and sessions

use crate::common::*;
use portex::CommitOptions;
use std::io::Read;

// ============================================================================
// Versioning
// ============================================================================

#[test]
fn branch_tag_and_draft_round_trip() {
    let tw = TestWorkspace::new();
    let mut ds = tw.dataset("pets");
    ds.insert_sheet("train", pets(0..10)).unwrap();
    let main = ds.commit("initial", Some("ten pets")).unwrap();
    let first = main.commit_id.clone().unwrap();

    // grow a dev branch
    ds.branches().create("dev", None).unwrap();
    ds.checkout("dev").unwrap();
    ds.sheet_mut("train").unwrap().extend_rows((10..13).map(pet).collect()).unwrap();
    ds.commit("three more", None).unwrap();
    assert_eq!(ids(ds.sheet("train").unwrap()), (0..13).collect::<Vec<_>>());

    // main is untouched
    ds.checkout("main").unwrap();
    assert_eq!(ds.head().commit_id(), Some(first.as_str()));
    assert_eq!(ds.sheet("train").unwrap().len(), 10);

    // tags detach HEAD
    ds.tags().create("v1", Some("dev")).unwrap();
    let head = ds.checkout("v1").unwrap();
    assert_eq!(head.branch(), None);
    assert_eq!(ds.sheet("train").unwrap().len(), 13);
    ds.sheet_mut("train").unwrap().extend_rows(vec![pet(99)]).unwrap();
    assert!(matches!(ds.commit("nope", None), Err(Error::InvalidState(_))));

    // edit a cell on main through a draft
    ds.checkout("main").unwrap();
    let mut draft = ds.drafts().create("rescore", Some("main"), None).unwrap();
    draft.sheet_mut("train").unwrap().set("score", 0, Value::Float(9.5)).unwrap();
    let report = draft.upload().unwrap();
    assert_eq!(report.sheet("train").unwrap().action, SheetAction::Update { rows: 1, from: 10 });
    assert_eq!(tw.remote.calls("update_rows"), 1);
    let branch = ds.commit_draft(&mut draft, CommitOptions::new("")).unwrap();
    assert_eq!(branch.name, "main");
    assert_eq!(ds.head().commit_id(), branch.commit_id.as_deref());

    let row = ds.sheet("train").unwrap().row(0).unwrap();
    assert_eq!(row.get("score").unwrap(), Value::Float(9.5));

    // another session sees the same history
    let reopened = tw.workspace.datasets().get("pets").unwrap();
    let titles: Vec<String> = reopened
        .commits()
        .list(None)
        .unwrap()
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert_eq!(titles, vec!["rescore".to_string(), "initial".to_string()]);
    assert_eq!(
        reopened.commits().get(Some("v1")).unwrap().title,
        "three more"
    );
}

#[test]
fn second_session_must_checkout_after_concurrent_commit() {
    let tw = TestWorkspace::new();
    let mut alice = tw.dataset("shared");
    alice.insert_sheet("train", pets(0..4)).unwrap();
    alice.commit("seed", None).unwrap();

    let mut bob = tw.workspace.datasets().get("shared").unwrap();
    alice.sheet_mut("train").unwrap().extend_rows(vec![pet(4)]).unwrap();
    alice.commit("alice", None).unwrap();

    bob.sheet_mut("train").unwrap().extend_rows(vec![pet(5)]).unwrap();
    assert!(matches!(bob.commit("bob", None), Err(Error::InvalidState(_))));
    // the rejected commit keeps bob's staged edit
    assert!(bob.is_modified());

    bob.checkout("main").unwrap();
    assert_eq!(ids(bob.sheet("train").unwrap()), vec![0, 1, 2, 3, 4]);
    bob.sheet_mut("train").unwrap().extend_rows(vec![pet(5)]).unwrap();
    bob.commit("bob", None).unwrap();

    alice.checkout("main").unwrap();
    assert_eq!(ids(alice.sheet("train").unwrap()), vec![0, 1, 2, 3, 4, 5]);
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn binary_cells_survive_commit_and_reopen() {
    let tw = TestWorkspace::new();
    let schema = SchemaType::record(vec![
        Field::new("name", SchemaType::string()),
        Field::new("image", SchemaType::binary()),
    ])
    .unwrap();
    let rows = ["a", "b", "c"]
        .iter()
        .map(|name| {
            Value::record([
                ("name", Value::from(*name)),
                ("image", Value::from(format!("pixels of {}", name).into_bytes())),
            ])
        })
        .collect();

    let mut ds = tw.dataset("images");
    ds.insert_sheet("photos", DataFrame::from_rows(schema, rows).unwrap()).unwrap();
    ds.commit("photos", None).unwrap();
    assert_eq!(tw.remote.puts(), 3);

    let mut reopened = tw.workspace.datasets().get("images").unwrap();
    let row = reopened.sheet("photos").unwrap().row(2).unwrap();
    let file = row.get("image").unwrap();
    let file = file.as_file().unwrap();
    assert!(!file.is_local());

    let mut content = String::new();
    file.open(&*tw.remote).unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "pixels of c");
}
