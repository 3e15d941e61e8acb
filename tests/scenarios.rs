//! End-to-end checks through the public API: a master allocating slots,
//! workers in other processes publishing, and the reaper reclaiming.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{fork_child, Pipe};
use shm_scoreboard::{
    LockMode, Record, RecordLayout, RecordUpdate, Region, RegionConfig, Scoreboard,
    ScoreboardError, SlotHandle, Status,
};

fn board(dir: &tempfile::TempDir, capacity: usize) -> Scoreboard {
    Scoreboard::new(RegionConfig::new(capacity).with_dir(dir.path())).unwrap()
}

#[test]
fn allocation_exhausts_at_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let board = board(&dir, 3);
    let indices: Vec<usize> = (0..3).map(|_| board.allocate().unwrap().index()).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let err = board.allocate().unwrap_err();
    assert!(matches!(err, ScoreboardError::Exhausted { capacity: 3 }));
    assert!(err.is_recoverable());
}

#[test]
fn worker_update_is_visible_in_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let board = board(&dir, 3);
    let mut slots: Vec<SlotHandle> = (0..3).map(|_| board.allocate().unwrap()).collect();

    slots[0].update(RecordUpdate::new().pid(100).status(Status::Waiting));
    slots[0].flush().unwrap();
    let before = board.snapshot().unwrap();

    let child = fork_child(|| {
        let Ok(mut slot) = board.worker_slot(1) else {
            return 1;
        };
        slot.update(
            RecordUpdate::new()
                .status(Status::Processing)
                .pid(4321)
                .requests_served(5),
        );
        match slot.flush() {
            Ok(()) => 0,
            Err(_) => 2,
        }
    });
    assert_eq!(child.wait(), 0);

    let after = board.snapshot().unwrap();
    assert_eq!(
        after[1],
        Record {
            pid: 4321,
            status: Status::Processing,
            last_request_started_at: 0,
            requests_served: 5,
            errors_served: 0,
        }
    );
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
}

#[test]
fn concurrent_snapshots_never_see_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let board = Arc::new(board(&dir, 4));
    let mut slot = board.allocate().unwrap();

    let reader = {
        let board = Arc::clone(&board);
        thread::spawn(move || {
            for _ in 0..200 {
                let record = board.snapshot().unwrap()[0];
                // Every flush writes pid == requests_served.
                assert_eq!(u64::from(record.pid), record.requests_served);
            }
        })
    };
    for n in 1..=200u32 {
        slot.update(RecordUpdate::new().pid(n).requests_served(u64::from(n)));
        slot.flush().unwrap();
    }
    reader.join().unwrap();
}

#[test]
fn dead_worker_slot_is_reclaimed_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let board = board(&dir, 3);
    for _ in 0..3 {
        let mut slot = board.allocate().unwrap();
        slot.update(RecordUpdate::new().pid(7).status(Status::Waiting));
        slot.flush().unwrap();
    }

    let child = fork_child(|| {
        let Ok(mut slot) = board.worker_slot(2) else {
            return 1;
        };
        slot.update(RecordUpdate::new().status(Status::Dead));
        if slot.flush().is_err() {
            return 2;
        }
        0
    });
    assert_eq!(child.wait(), 0);

    assert_eq!(board.sweep_dead().unwrap(), vec![2]);
    assert_eq!(board.snapshot().unwrap()[2], Record::default());
    assert!(board.sweep_dead().unwrap().is_empty());

    let next = board.allocate().unwrap();
    assert_eq!(next.index(), 2);
    assert_eq!(*next.record(), Record::default());
    assert_eq!(board.snapshot().unwrap()[2], Record::default());
}

#[test]
fn zero_capacity_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let res = Scoreboard::new(RegionConfig::new(0).with_dir(dir.path()));
    assert!(matches!(res, Err(ScoreboardError::Allocation { .. })));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn snapshot_excludes_a_worker_mid_write() {
    let dir = tempfile::tempdir().unwrap();
    let board = board(&dir, 3);
    let index = board.allocate().unwrap().index();
    let mut neighbour = board.allocate().unwrap();
    let writing = Pipe::new();
    let finish = Pipe::new();

    // The worker holds its slot lock as a flush in progress would.
    let child = fork_child(|| {
        let region = board.region();
        let Ok((offset, len)) = region.slot_offset(index) else {
            return 1;
        };
        let Ok(guard) = region.lock_range(offset, len, LockMode::Exclusive, None) else {
            return 2;
        };
        writing.signal();
        finish.wait();
        match guard.unlock() {
            Ok(()) => 0,
            Err(_) => 3,
        }
    });
    assert!(writing.wait());

    let res = board.region().snapshot_timeout(Some(Duration::from_millis(50)));
    assert!(matches!(res, Err(ScoreboardError::LockTimeout { .. })));

    // Other slots stay writable meanwhile.
    neighbour.update(RecordUpdate::new().pid(8).status(Status::Waiting));
    neighbour
        .flush_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    finish.signal();
    assert_eq!(child.wait(), 0);
    assert_eq!(board.snapshot().unwrap()[neighbour.index()].pid, 8);
}

#[test]
fn unrelated_process_attaches_by_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attach.slots");
    let ready = Pipe::new();
    let published = Pipe::new();

    // The master lives in a child; this process never inherited its region.
    let master = fork_child(|| {
        let config = RegionConfig::new(2)
            .with_dir(dir.path())
            .with_name("attach")
            .with_layout(RecordLayout::COMPACT)
            .with_lock_timeout(Duration::from_secs(5));
        let Ok(board) = Scoreboard::new(config) else {
            return 1;
        };
        if board.allocate().map(|slot| slot.index()).ok() != Some(0) {
            return 2;
        }
        ready.signal();
        if !published.wait() {
            return 3;
        }
        let Ok(snap) = board.snapshot() else {
            return 4;
        };
        let record = snap[0];
        let expected = record.status == Status::Waiting
            && record.requests_served == 1
            && record.errors_served == 1
            && record.last_request_started_at > 0;
        if expected {
            0
        } else {
            5
        }
    });
    assert!(ready.wait());

    let attached = Arc::new(Region::attach(&path, RecordLayout::COMPACT).unwrap());
    assert_eq!(attached.capacity(), 2);
    assert!(!attached.is_owner());

    let mut slot = SlotHandle::new(Arc::clone(&attached), 0).unwrap();
    slot.begin_request();
    slot.finish_request(false);
    slot.flush().unwrap();
    assert_eq!(attached.snapshot().unwrap()[0], *slot.record());
    published.signal();

    assert_eq!(master.wait(), 0);
    drop(slot);
    drop(attached);
    // The creating process removed the file when it dropped its region.
    assert!(!path.exists());
}

#[test]
fn owning_process_cannot_attach_a_second_time() {
    let dir = tempfile::tempdir().unwrap();
    let board = board(&dir, 2);
    let res = Region::attach(board.region().path(), RecordLayout::default());
    assert!(matches!(res, Err(ScoreboardError::AlreadyMapped { .. })));

    // Forked workers go through the inherited region instead.
    let child = fork_child(|| {
        let attach = Region::attach(board.region().path(), RecordLayout::default());
        let inherited = board.worker_slot(1).map(|slot| slot.flush());
        match (attach, inherited) {
            (Err(ScoreboardError::AlreadyMapped { .. }), Ok(Ok(()))) => 0,
            _ => 1,
        }
    });
    assert_eq!(child.wait(), 0);
}
