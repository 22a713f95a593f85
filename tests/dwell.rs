use smhmm_rs::HmmError;
use smhmm_rs::dwell::{DwellTable, TransitionKind};

fn table() -> DwellTable {
    let path = [0, 0, 1, 1, 1, 0, 2, 2, 0];
    let x = [0.1, 0.0, 0.6, 0.4, 0.5, 0.2, 0.9, 1.1, 0.05];
    DwellTable::new(&path, &x, &[0.0, 0.5, 1.0]).expect("dwell table")
}

#[test]
fn dwells_cover_the_path() {
    let t = table();
    assert_eq!(t.len(), 5);
    let spans: Vec<(usize, usize, usize)> =
        t.dwells.iter().map(|d| (d.start, d.stop, d.state)).collect();
    assert_eq!(spans, vec![(0, 2, 0), (2, 5, 1), (5, 6, 0), (6, 8, 2), (8, 9, 0)]);
    assert_eq!(t.dwells.iter().map(|d| d.length).sum::<usize>(), 9);
    assert_eq!(t.dwells[1].median, 0.5);
    assert_eq!(t.dwells[3].median, 1.0);
    assert_eq!(t.dwells[3].mean, 1.0);
}

#[test]
fn transitions_pair_consecutive_dwells() {
    let t = table();
    assert_eq!(
        t.transitions(TransitionKind::State),
        vec![(0.0, 1.0), (1.0, 0.0), (0.0, 2.0), (2.0, 0.0)]
    );
    assert_eq!(
        t.transitions(TransitionKind::Fit),
        vec![(0.0, 0.5), (0.5, 0.0), (0.0, 1.0), (1.0, 0.0)]
    );
    let data = t.transitions(TransitionKind::Data);
    assert_eq!(data.len(), 4);
    assert_eq!(data[0], (0.05, 0.5));
}

#[test]
fn censored_dwells_are_not_counted() {
    let t = table();
    assert_eq!(t.dwell_times(1, 0), vec![3]);
    assert_eq!(t.dwell_times(0, 2), vec![1]);
    assert_eq!(t.dwell_times(2, 0), vec![2]);
    // the first dwell is a 0 -> 1 transition but is censored
    assert!(t.dwell_times(0, 1).is_empty());
}

#[test]
fn kinds_parse_and_inputs_are_checked() {
    assert_eq!("fit".parse::<TransitionKind>(), Ok(TransitionKind::Fit));
    assert_eq!("Data".parse::<TransitionKind>(), Ok(TransitionKind::Data));
    assert!("mean".parse::<TransitionKind>().is_err());

    let err = DwellTable::new(&[0, 1], &[0.0], &[0.0, 1.0]).expect_err("length mismatch");
    assert_eq!(
        err.downcast_ref::<HmmError>(),
        Some(&HmmError::LengthMismatch {
            expected: 1,
            found: 2
        })
    );
    assert!(DwellTable::new(&[], &[], &[0.0]).expect("empty").is_empty());
}
