//! Protocol properties of the observer registration and commit buffer:
//! snapshot/delta atomicity, single outstanding go-live, removal before
//! addition, cancellation idempotence, batch cap and enable fidelity.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;

use exec_view_sync::core::config::SynchronizerConfig;
use exec_view_sync::logger::journal::JournalHandle;
use exec_view_sync::results::node_cache::NodeCache;
use exec_view_sync::results::outcome::{Category, TestRef};
use exec_view_sync::sync::buffer::CommitBuffer;
use exec_view_sync::sync::synchronizer::{BackgroundSynchronizer, SyncOutcome};
use exec_view_sync::ui::event_loop::UiLoop;
use exec_view_sync::ui::table::{EventLog, TableEvent, TableModel};
use exec_view_sync::view::category_model::CategoryViewModel;

fn buffer(ui: &UiLoop, batch: usize) -> Arc<CommitBuffer> {
    CommitBuffer::new(Category::Passed, ui.handle(), batch, JournalHandle::disabled())
}

fn model(ui: &UiLoop, category: Category) -> Arc<CategoryViewModel> {
    CategoryViewModel::new(category, ui.handle(), 100, JournalHandle::disabled())
}

// ──────────────────── snapshot/delta atomicity ────────────────────

/// Publish `total` tests into `cache` from a producer thread while a
/// synchronizer registers `model`; return the tests published as Passed.
fn race_registration(
    ui: &UiLoop,
    model: &Arc<CategoryViewModel>,
    cache: &Arc<NodeCache>,
    total: usize,
    head_start: usize,
) -> Vec<TestRef> {
    let tests = common::make_tests("race", total);
    for t in &tests[..head_start] {
        cache.publish(t.clone(), Category::Passed);
    }
    model.reset(Some(Arc::clone(cache)));

    let producer = {
        let cache = Arc::clone(cache);
        let rest = tests[head_start..].to_vec();
        thread::spawn(move || {
            for t in rest {
                cache.publish(t, Category::Passed);
            }
        })
    };
    let mut sync = BackgroundSynchronizer::start(
        model.clone(),
        Arc::clone(cache),
        &SynchronizerConfig::default(),
        JournalHandle::disabled(),
    )
    .expect("start synchronizer");
    producer.join().expect("producer");
    assert!(matches!(sync.join(), Some(SyncOutcome::Completed { .. })));

    common::pump_until(ui, || model.buffer().pending_len() == (0, 0) && ui.pending() == 0);
    tests
}

#[test]
fn registration_race_shows_every_result_exactly_once() {
    let ui = UiLoop::new();
    let m = model(&ui, Category::Passed);
    let cache = Arc::new(NodeCache::new("race"));
    let tests = race_registration(&ui, &m, &cache, 400, 150);

    let rows = m.rows();
    assert_eq!(rows.len(), tests.len(), "no gap and no duplicate");
    let unique: HashSet<TestRef> = rows.iter().cloned().collect();
    assert_eq!(unique.len(), rows.len());
    let expected: HashSet<TestRef> = tests.into_iter().collect();
    assert_eq!(unique, expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// However the producer and the registration interleave, the table ends
    /// up holding exactly the cache's bucket.
    #[test]
    fn snapshot_plus_deltas_equals_cache(total in 1usize..300, split in 0.0f64..1.0) {
        let ui = UiLoop::new();
        let m = model(&ui, Category::Passed);
        let cache = Arc::new(NodeCache::new("race"));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let head_start = ((total as f64) * split) as usize;
        let tests = race_registration(&ui, &m, &cache, total, head_start.min(total));

        let rows = m.rows();
        prop_assert_eq!(rows.len(), tests.len());
        let unique: HashSet<TestRef> = rows.into_iter().collect();
        prop_assert_eq!(unique, tests.into_iter().collect::<HashSet<_>>());
    }
}

// ──────────────────── single outstanding go-live ────────────────────

#[test]
fn concurrent_enqueues_keep_one_go_live_outstanding() {
    let ui = UiLoop::new();
    let buf = buffer(&ui, 25);
    let violations = Arc::new(Mutex::new(0usize));
    let producers: Vec<_> = (0..6)
        .map(|p| {
            let buf = Arc::clone(&buf);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                for t in common::make_tests(&format!("p{p}"), 150) {
                    buf.enqueue_add(t, false);
                    if buf.outstanding_go_lives() > 1 {
                        *violations.lock() += 1;
                    }
                }
            })
        })
        .collect();

    // Drain concurrently with the producers.
    let mut drained = 0;
    while drained < 6 * 150 {
        ui.run_for(std::time::Duration::from_millis(2));
        assert!(buf.outstanding_go_lives() <= 1);
        drained = buf.live_len();
        if producers.iter().all(thread::JoinHandle::is_finished) && ui.pending() == 0 {
            buf.flush();
            ui.run_pending();
            drained = buf.live_len();
            break;
        }
    }
    for p in producers {
        p.join().expect("producer");
    }
    ui.run_pending();
    assert_eq!(*violations.lock(), 0);
    assert_eq!(buf.live_len(), 6 * 150);
}

// ──────────────────── removal precedes addition ────────────────────

#[test]
fn removed_identity_is_absent_even_if_re_added_in_same_pass() {
    let ui = UiLoop::new();
    let buf = buffer(&ui, 100);
    let tests = common::make_tests("order", 4);
    for t in &tests[..2] {
        buf.enqueue_add(t.clone(), false);
    }
    ui.run_pending();

    buf.enqueue_add(tests[0].clone(), true);
    buf.enqueue_remove(tests[0].clone());
    buf.enqueue_add(tests[2].clone(), true);
    buf.enqueue_add(tests[3].clone(), true);
    buf.enqueue_remove(tests[3].clone());

    let log = EventLog::new();
    buf.add_listener(log.clone());
    assert!(ui.run_next());
    assert_eq!(buf.live_rows(), vec![tests[1].clone(), tests[2].clone()]);
    // The delete is reported before the insert.
    assert_eq!(
        log.events(),
        vec![
            TableEvent::RowsDeleted { first: 0, last: 0 },
            TableEvent::RowsInserted { first: 1, last: 1 },
        ]
    );
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Remove(usize),
}

fn arb_ops(pool: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            (0..pool).prop_map(Op::Add),
            (0..pool).prop_map(Op::Remove),
        ],
        0..80,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// With all work queued before the first pass, the final table is the
    /// live rows plus additions in order, minus every removed identity.
    #[test]
    fn drain_result_matches_remove_wins_model(
        preload in 0usize..10,
        ops in arb_ops(30),
        batch in 1usize..20,
    ) {
        let ui = UiLoop::new();
        let buf = buffer(&ui, batch);
        let pool = common::make_tests("pool", 40);

        // Preloaded tests live at indexes 30.. so Add ops never duplicate them.
        let live: Vec<TestRef> = pool[30..30 + preload].to_vec();
        for t in &live {
            buf.enqueue_add(t.clone(), false);
        }
        ui.run_pending();

        let mut added: Vec<usize> = Vec::new();
        let mut removed: HashSet<usize> = HashSet::new();
        for op in &ops {
            match *op {
                Op::Add(i) if !added.contains(&i) => {
                    added.push(i);
                    buf.enqueue_add(pool[i].clone(), false);
                }
                Op::Add(_) => {}
                Op::Remove(i) => {
                    removed.insert(i);
                    buf.enqueue_remove(pool[i].clone());
                }
            }
            prop_assert!(buf.outstanding_go_lives() <= 1);
        }
        ui.run_pending();

        let expected: Vec<TestRef> = live
            .into_iter()
            .chain(added.iter().filter(|i| !removed.contains(i)).map(|i| pool[*i].clone()))
            .collect();
        prop_assert_eq!(buf.live_rows(), expected);
        prop_assert_eq!(buf.pending_len(), (0, 0));
    }
}

// ──────────────────── cancellation idempotence ────────────────────

#[test]
fn stale_notifications_after_model_reset_change_nothing() {
    let ui = UiLoop::new();
    let m = model(&ui, Category::Failed);
    let cache = common::populated_cache("stale", [0, 30, 0, 0]);
    m.reset(Some(Arc::clone(&cache)));
    {
        let mut guard = cache.lock();
        let att = exec_view_sync::sync::synchronizer::ScanTarget::attach(m.as_ref(), &mut guard)
            .expect("attach");
        for t in att.bucket {
            att.buffer.enqueue_add_in(att.epoch, t, false);
        }
    }
    let queued = ui.pending();
    assert!(queued >= 1, "go-live and enable were scheduled");

    m.reset(None);
    let log = EventLog::new();
    m.add_listener(log.clone());
    assert_eq!(ui.run_pending(), queued);
    assert_eq!(m.row_count(), 0);
    assert!(!m.is_enabled());
    assert!(log.events().is_empty());

    // Resetting twice is harmless.
    m.reset(None);
    ui.run_pending();
    assert_eq!(m.row_count(), 0);
}

// ──────────────────── batch cap ────────────────────

#[test]
fn two_hundred_fifty_adds_take_three_drains() {
    let ui = UiLoop::new();
    let buf = buffer(&ui, 100);
    for t in common::make_tests("cap", 250) {
        buf.enqueue_add(t, false);
    }
    let mut sizes = Vec::new();
    while ui.run_next() {
        sizes.push(buf.live_len());
    }
    assert_eq!(sizes, vec![100, 200, 250]);
    assert_eq!(buf.stats().drains, 3);
}

proptest! {
    #[test]
    fn every_pass_promotes_at_most_one_batch(n in 0usize..600, batch in 1usize..150) {
        let ui = UiLoop::new();
        let buf = buffer(&ui, batch);
        for t in common::make_tests("cap", n) {
            buf.enqueue_add(t, false);
        }
        let mut previous = 0;
        let mut passes = 0;
        while ui.run_next() {
            let now = buf.live_len();
            prop_assert!(now - previous <= batch);
            prop_assert!(now - previous == batch || now == n);
            previous = now;
            passes += 1;
        }
        prop_assert_eq!(previous, n);
        prop_assert_eq!(passes, n.div_ceil(batch));
    }
}

// ──────────────────── enable fidelity ────────────────────

#[test]
fn tab_follows_zero_one_zero_counts() {
    let ui = UiLoop::new();
    let m = model(&ui, Category::Passed);
    let cache = Arc::new(NodeCache::new("enable"));
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transitions);
    m.on_enabled_changed(Arc::new(move |category, enabled| {
        seen.lock().push((category, enabled));
    }));

    m.reset(Some(Arc::clone(&cache)));
    let mut sync = BackgroundSynchronizer::start(
        m.clone(),
        Arc::clone(&cache),
        &SynchronizerConfig::default(),
        JournalHandle::disabled(),
    )
    .expect("start");
    sync.join();
    ui.run_pending();
    assert!(!m.is_enabled());

    let t = TestRef::new("enable/A", "");
    cache.publish(t.clone(), Category::Passed);
    assert!(!m.is_enabled(), "not applied until the UI thread runs");
    ui.run_pending();
    assert!(m.is_enabled());

    cache.withdraw(&t);
    ui.run_pending();
    assert!(!m.is_enabled());
    assert_eq!(
        *transitions.lock(),
        vec![(Category::Passed, true), (Category::Passed, false)]
    );
}
