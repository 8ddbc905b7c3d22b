//! Online query and apply against committed sheets

use crate::common::*;
use portex::Predicate;

fn committed(tw: &TestWorkspace) -> Dataset {
    let mut ds = tw.dataset("pets");
    ds.insert_sheet("train", pets(0..12)).unwrap();
    ds.commit("pets", None).unwrap();
    ds
}

#[test]
fn online_query_matches_local_query() {
    let tw = TestWorkspace::new();
    let mut ds = committed(&tw);
    let sheet = ds.sheet("train").unwrap();

    let predicates = vec![
        col("label").eq("dog"),
        col("label").not_in(["cat", "bird"]).and(col("id").gt(3)),
        col("score").eq(Value::Null).or(col("score").gte(4.5)),
        col("label").is_in(["bird"]),
    ];
    for predicate in predicates {
        let local = sheet.query(&predicate).unwrap();
        let remote = tw.workspace.online(|| sheet.query(&predicate)).unwrap();
        assert_eq!(ids(&local), ids(&remote), "{predicate:?}");
    }
    assert_eq!(tw.remote.calls("search"), 4);
}

#[test]
fn online_apply_projects_a_column() {
    let tw = TestWorkspace::new();
    let mut ds = committed(&tw);
    let sheet = ds.sheet("train").unwrap();

    let map = RowMap::Column("label".into());
    let local = sheet.apply(&map).unwrap().to_values().unwrap();
    let remote = {
        let _guard = tw.workspace.enter_online();
        sheet.apply(&map).unwrap().to_values().unwrap()
    };
    assert_eq!(local, remote);
    assert_eq!(remote[2], Value::from("bird"));
}

#[test]
fn online_mode_rejects_what_the_server_cannot_see() {
    let tw = TestWorkspace::new();
    let mut ds = committed(&tw);

    let custom = Predicate::custom(|row| Ok(row.get("id")?.as_int() == Some(1)));
    let sheet = ds.sheet("train").unwrap();
    let err = tw.workspace.online(|| sheet.query(&custom)).unwrap_err();
    assert!(matches!(err, Error::Criteria(_)));

    // local edits are invisible to the search backend
    ds.sheet_mut("train").unwrap().extend_rows(vec![pet(12)]).unwrap();
    let sheet = ds.sheet("train").unwrap();
    let err = tw.workspace.online(|| sheet.query(&col("id").eq(12))).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // so are frames built in memory
    let local = pets(0..3);
    let err = tw.workspace.online(|| local.query(&col("id").eq(1))).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(tw.remote.calls("search"), 0);
}
