mod common;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use vkring::*;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn begin_never_returns_a_busy_slot() {
    let (device, mut ctx) = common::headless();
    let mut rng = Lcg(7);
    let mut in_flight: Vec<CmdSlot> = Vec::new();

    for _ in 0..2000 {
        match rng.next() % 4 {
            0 => device.retire((rng.next() % 8) as usize),
            _ => {
                let pool = ctx.pool_mut(QueueType::Graphics);
                in_flight.retain(|slot| !pool.is_complete(*slot));
                let busy: HashSet<usize> = in_flight.iter().map(|s| s.index()).collect();

                match pool.begin() {
                    Ok(slot) => {
                        assert!(!busy.contains(&slot.index()));
                        pool.submit(slot, false).unwrap();
                        in_flight.push(slot);
                    }
                    Err(GPUError::ResourceExhausted) => {
                        assert_eq!(busy.len(), MAX_CMDS - 1);
                    }
                    Err(err) => panic!("unexpected error {}", err),
                }
            }
        }
    }

    ctx.wait_idle().unwrap();
    assert!(ctx.is_idle());
}

#[test]
fn callbacks_follow_submission_order_across_partial_retires() {
    let (device, mut ctx) = common::headless();
    let order = Rc::new(RefCell::new(Vec::new()));

    for n in 0..20 {
        let pool = ctx.pool_mut(QueueType::Graphics);
        let slot = pool.begin().unwrap();
        let order = order.clone();
        pool.add_callback(slot, move || order.borrow_mut().push(n))
            .unwrap();
        pool.submit(slot, false).unwrap();
    }

    for batch in [3, 1, 7, 9] {
        device.retire(batch);
        ctx.poll(Duration::ZERO).unwrap();
    }

    assert_eq!(*order.borrow(), (0..20).collect::<Vec<_>>());
}

#[test]
fn exhausted_ring_recovers_after_retire() {
    let (device, mut ctx) = common::headless();
    let pool = ctx.pool_mut(QueueType::Graphics);

    for _ in 0..MAX_CMDS - 1 {
        let slot = pool.begin().unwrap();
        pool.submit(slot, false).unwrap();
    }
    assert!(matches!(pool.begin(), Err(GPUError::ResourceExhausted)));
    assert_eq!(pool.pending(), MAX_CMDS - 1);

    device.retire(1);
    let slot = pool.begin().unwrap();
    pool.discard(slot).unwrap();
}

#[test]
fn completion_semaphore_feeds_later_submission() {
    let (device, mut ctx) = common::headless();
    let pool = ctx.pool_mut(QueueType::Graphics);

    let first = pool.begin().unwrap();
    let done = pool.submit(first, true).unwrap().unwrap();

    let second = pool.begin().unwrap();
    pool.add_dependency(second, done, PipelineStage::TRANSFER)
        .unwrap();
    assert!(pool.submit(second, false).unwrap().is_none());

    let subs = device.submissions();
    assert_eq!(subs.len(), 2);
    assert!(subs[0].signaled);
    assert_eq!(subs[1].wait_count, 1);
    assert_eq!(subs[1].wait_stages, vec![PipelineStage::TRANSFER]);
    assert!(!subs[1].signaled);
}

#[test]
fn transfer_work_goes_to_its_own_family() {
    let (device, mut ctx) = common::headless_with_transfer();
    assert!(ctx.has_async_transfer());

    for queue in [QueueType::Graphics, QueueType::Transfer, QueueType::Graphics] {
        let pool = ctx.pool_mut(queue);
        let slot = pool.begin().unwrap();
        pool.submit(slot, false).unwrap();
    }

    let families: Vec<u32> = device.submissions().iter().map(|s| s.family).collect();
    assert_eq!(families, vec![0, 1, 0]);

    // Graphics submissions alternate between its two queues.
    let gfx_queues: Vec<u32> = device
        .submissions()
        .iter()
        .filter(|s| s.family == 0)
        .map(|s| s.queue)
        .collect();
    assert_eq!(gfx_queues, vec![0, 1]);
}

#[test]
fn deferred_work_waits_for_every_pool() {
    let (device, mut ctx) = common::headless_with_transfer();

    // Transfer first so retiring in order finishes graphics last.
    for queue in [QueueType::Transfer, QueueType::Graphics] {
        let pool = ctx.pool_mut(queue);
        let slot = pool.begin().unwrap();
        pool.submit(slot, false).unwrap();
    }

    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();
    ctx.defer(move || *flag.borrow_mut() = true);

    device.retire(1);
    ctx.poll(Duration::ZERO).unwrap();
    assert!(!*ran.borrow());

    device.retire(1);
    ctx.poll(Duration::ZERO).unwrap();
    assert!(*ran.borrow());
}

#[test]
fn failed_submission_does_not_stall_the_ring() {
    let (device, mut ctx) = common::headless();
    let pool = ctx.pool_mut(QueueType::Graphics);
    let ran = Rc::new(RefCell::new(false));

    let slot = pool.begin().unwrap();
    let flag = ran.clone();
    pool.add_callback(slot, move || *flag.borrow_mut() = true)
        .unwrap();
    device.fail_next_submit();
    let err = pool.submit(slot, false).unwrap_err();
    assert!(matches!(err, GPUError::SubmitError(_)));

    let next = pool.begin().unwrap();
    pool.submit(next, false).unwrap();
    assert!(*ran.borrow());

    ctx.wait_idle().unwrap();
    assert!(ctx.is_idle());
}
