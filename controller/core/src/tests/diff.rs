use crate::partition;

#[derive(Clone, Debug, PartialEq)]
struct Desired {
    id: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
struct Actual {
    arn: &'static str,
    resource_id: Option<&'static str>,
}

fn run(desired: Vec<Desired>, actual: Vec<Actual>) -> crate::Partition<Desired, Actual> {
    partition(
        desired,
        actual,
        |d| d.id,
        |a| a.resource_id,
        |a| a.arn.to_string(),
    )
}

#[test]
fn pairs_by_resource_id() {
    let out = run(
        vec![Desired { id: "svc-80" }, Desired { id: "svc-8080" }],
        vec![
            Actual {
                arn: "arn:1",
                resource_id: Some("svc-80"),
            },
            Actual {
                arn: "arn:2",
                resource_id: Some("orphan"),
            },
        ],
    );

    assert_eq!(out.matched.len(), 1);
    assert_eq!(out.matched[0].0.id, "svc-80");
    assert_eq!(out.matched[0].1.arn, "arn:1");
    assert_eq!(out.unmatched_desired, vec![Desired { id: "svc-8080" }]);
    assert_eq!(out.unmatched_actual.len(), 1);
    assert_eq!(out.unmatched_actual[0].arn, "arn:2");
}

#[test]
fn untagged_actuals_never_match() {
    let out = run(
        vec![Desired { id: "svc-80" }],
        vec![Actual {
            arn: "arn:1",
            resource_id: None,
        }],
    );
    assert!(out.matched.is_empty());
    assert_eq!(out.unmatched_desired.len(), 1);
    assert_eq!(out.unmatched_actual.len(), 1);
}

#[test]
fn ambiguous_match_keeps_first_by_arn_ascending() {
    let out = run(
        vec![Desired { id: "svc-80" }],
        vec![
            Actual {
                arn: "arn:zzz",
                resource_id: Some("svc-80"),
            },
            Actual {
                arn: "arn:aaa",
                resource_id: Some("svc-80"),
            },
            Actual {
                arn: "arn:mmm",
                resource_id: Some("svc-80"),
            },
        ],
    );

    assert_eq!(out.matched.len(), 1);
    assert_eq!(out.matched[0].1.arn, "arn:aaa");
    let extra: Vec<&str> = out.unmatched_actual.iter().map(|a| a.arn).collect();
    assert_eq!(extra, vec!["arn:mmm", "arn:zzz"]);
}

#[test]
fn steady_state_has_no_unmatched() {
    let out = run(
        vec![Desired { id: "svc-80" }],
        vec![Actual {
            arn: "arn:1",
            resource_id: Some("svc-80"),
        }],
    );
    assert!(out.is_steady());
}
