use std::rc::Rc;

use rstest::rstest;

use super::{Edge, Filter};
use crate::registry::RegistryKey;

#[rstest]
#[case(7, true)]
#[case(8, false)]
fn value_filter_matches_by_equality(#[case] v: i32, #[case] expected: bool) {
    assert_eq!(Filter::value(7).matches(&v), expected);
}

#[test]
fn any_filter_matches_everything() {
    let f: Filter<i32> = Filter::any();
    assert!(f.matches(&0));
    assert!(f.matches(&-5));
}

#[test]
fn when_filter_runs_the_closure() {
    let f = Filter::when(|v: &i32| *v > 10);
    assert!(f.matches(&11));
    assert!(!f.matches(&10));
}

#[test]
fn from_value() {
    let f: Filter<i32> = 7.into();
    assert!(f.matches(&7));
    assert!(!f.matches(&8));
}

#[test]
fn default_is_any() {
    let f: Filter<i32> = Filter::default();
    assert!(f.matches(&123));
}

#[test]
fn equal_values_share_a_key() {
    let a: Filter<i32> = 42.into();
    let b: Filter<i32> = 42.into();
    let c: Filter<i32> = 43.into();
    assert!(a.same_key(&b));
    assert!(!a.same_key(&c));
}

#[test]
fn closures_key_by_identity() {
    let f: Rc<dyn Fn(&i32) -> bool> = Rc::new(|v: &i32| *v > 0);
    let a = Filter(super::RawFilter::Fn(f.clone()));
    let b = Filter(super::RawFilter::Fn(f));
    let c = Filter::when(|v: &i32| *v > 0);
    assert!(a.same_key(&b));
    assert!(!a.same_key(&c));
}

#[test]
fn value_never_shares_with_closure() {
    let value: Filter<i32> = 42.into();
    let closure = Filter::when(|v: &i32| *v == 42);
    assert!(!value.same_key(&closure));
    assert!(!value.same_key(&Filter::any()));
}

#[rstest]
#[case(14, 0, true)]
#[case(0, 14, false)]
fn value_edge_matches_new_value(#[case] new: i32, #[case] old: i32, #[case] expected: bool) {
    assert_eq!(Edge::value(14).matches(&new, &old), expected);
}

#[test]
fn any_edge_matches_every_transition() {
    let e: Edge<i32> = Edge::any();
    assert!(e.matches(&1, &2));
    assert!(e.matches(&2, &1));
}

#[test]
fn when_edge_sees_both_values() {
    let e = Edge::when(|new: &i32, old: &i32| *new > 10 && *old < 0);
    assert!(e.matches(&11, &-1));
    assert!(!e.matches(&11, &0));
    assert!(!e.matches(&10, &-1));
}

#[test]
fn edge_keys_follow_filter_rules() {
    let a: Edge<i32> = 1.into();
    let b: Edge<i32> = 1.into();
    assert!(a.same_key(&b));
    assert!(!a.same_key(&Edge::any()));
    assert!(Edge::<i32>::any().same_key(&Edge::any()));
    assert!(!Edge::when(|_: &i32, _: &i32| true).same_key(&Edge::when(|_, _| true)));
}

#[test]
fn debug_formats() {
    assert_eq!(format!("{:?}", Filter::<i32>::any()), "Filter::any()");
    assert_eq!(format!("{:?}", Filter::value(7)), "Filter::value(7)");
    assert_eq!(
        format!("{:?}", Filter::when(|v: &i32| *v > 0)),
        "Filter::when(..)"
    );
    assert_eq!(format!("{:?}", Edge::value(7)), "Edge::value(7)");
}
