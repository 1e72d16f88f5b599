//! Top-level solve sequencing.
//!
//! Grounded on `include/tree_mpi.h`/`include/partition.h`'s call sequence as
//! summarized in §4.7: partition, build tree, upward pass, then per-peer
//! LET build+exchange+traversal, local-local traversal, downward pass. Also
//! grounded on `fmm/src/fmm.rs`'s `FmmLoop::run`, which sequences
//! `upward_pass`/`downward_pass` and returns an optional timing dict —
//! here a [`crate::logger::Timer`] plays that role.

use crate::body::Bodies;
use crate::comm::Comm;
use crate::config::Config;
use crate::error::{abort_rank, FmmError};
use crate::expansion::{downward_pass, upward_pass};
use crate::kernel::Kernel;
use crate::let_exchange::LetExchange;
use crate::logger::Timer;
use crate::partition::{global_bounds, partition, rank_subbox};
use crate::traversal::Traversal;
use crate::tree::{build_tree, choose_depth};
use num_traits::Float;

pub struct Solver<'a, T: Float> {
    pub cfg: Config,
    pub kernel: &'a (dyn Kernel<T> + Sync),
}

impl<'a, T: Float + Send + Sync> Solver<'a, T> {
    pub fn new(cfg: Config, kernel: &'a (dyn Kernel<T> + Sync)) -> Self {
        Self { cfg, kernel }
    }

    /// Run one full solve: partition -> build -> upward -> LET exchange ->
    /// traversal -> downward. Returns the redistributed, Morton-sorted body
    /// set with `trg` filled in, and the timing breakdown.
    ///
    /// On any invariant or transport failure this aborts the whole job via
    /// [`abort_rank`], per the error handling design: a divergent rank
    /// cannot be allowed to return while its peers still wait at a collective.
    pub fn solve<C: Comm>(&self, bodies: Bodies<T>, comm: &C) -> (Bodies<T>, Timer) {
        let rank = comm.rank();
        match self.try_solve(bodies, comm) {
            Ok(result) => result,
            Err(err) => abort_rank(rank, &err),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(rank = comm.rank(), n = bodies.len()))]
    fn try_solve<C: Comm>(&self, bodies: Bodies<T>, comm: &C) -> Result<(Bodies<T>, Timer), FmmError> {
        let mut timer = Timer::new();
        if bodies.is_empty() {
            tracing::debug!("empty body set, nothing to solve");
            return Ok((bodies, timer));
        }

        let (mut local_bodies, domain, _cube) = {
            let _span = tracing::info_span!("partition").entered();
            timer.start("partition");
            let result = partition(bodies, comm)?;
            timer.stop("partition");
            result
        };
        tracing::debug!(n = local_bodies.len(), "partitioned onto this rank");

        let mut cells = {
            let _span = tracing::info_span!("build_tree").entered();
            timer.start("build_tree");
            let local_bounds = crate::geometry::Bounds::of_points(local_bodies.iter().map(|b| &b.x))
                .unwrap_or(crate::geometry::Bounds { xmin: crate::geometry::Vec3::zero(), xmax: crate::geometry::Vec3::zero() });
            let (_, cube) = global_bounds(&local_bounds, comm);
            let depth = choose_depth(local_bodies.len(), self.cfg.ncrit);
            let cells = build_tree(&mut local_bodies, &cube, depth, self.cfg.expansion_order);
            timer.stop("build_tree");
            cells
        };
        tracing::debug!(cells = cells.len(), "built local tree");

        {
            let _span = tracing::info_span!("upward_pass").entered();
            timer.start("upward_pass");
            upward_pass(&mut cells, &local_bodies, self.kernel, &self.cfg);
            timer.stop("upward_pass");
        }

        let size = comm.size();
        if size > 1 {
            let _span = tracing::info_span!("let_exchange").entered();
            timer.start("let_exchange");
            let mut let_exchange: LetExchange<T> = LetExchange::new(size as usize);
            let npartition = crate::partition::partition_grid(size);
            for peer in 0..size as usize {
                if peer == comm.rank() as usize {
                    continue;
                }
                let peer_bounds = rank_subbox(&domain, npartition, peer as i32);
                let cycle = T::from(self.cfg.cycle).unwrap();
                let_exchange.build_for_peer(peer, &cells, &local_bodies, &peer_bounds, cycle, self.cfg.images, size);
            }
            let_exchange.comm_cells(comm)?;
            let_exchange.comm_bodies(comm)?;
            timer.stop("let_exchange");
            drop(_span);
            tracing::debug!(recv_cells = let_exchange.recv_cells.len(), recv_bodies = let_exchange.recv_bodies.len(), "LET exchange complete");

            let _span = tracing::info_span!("remote_traversal").entered();
            timer.start("remote_traversal");
            for peer in 0..size as usize {
                if peer == comm.rank() as usize {
                    continue;
                }
                let remote_cells = let_exchange.get_let(peer, self.cfg.expansion_order);
                if remote_cells.is_empty() {
                    continue;
                }
                let trav = Traversal::new(&cells, &remote_cells, &local_bodies, &let_exchange.recv_bodies, self.kernel, &self.cfg);
                trav.traverse_frontier();
                let (locals, trgs) = trav.into_locals();
                accumulate(&mut cells, &mut local_bodies, locals, trgs);
            }
            timer.stop("remote_traversal");
        }

        {
            let _span = tracing::info_span!("local_traversal", mutual = self.cfg.mutual).entered();
            timer.start("local_traversal");
            let trav = Traversal::new(&cells, &cells, &local_bodies, &local_bodies, self.kernel, &self.cfg);
            trav.dual_tree_traversal(self.cfg.mutual);
            let (locals, trgs) = trav.into_locals();
            accumulate(&mut cells, &mut local_bodies, locals, trgs);
            timer.stop("local_traversal");
        }

        {
            let _span = tracing::info_span!("downward_pass").entered();
            timer.start("downward_pass");
            downward_pass(&mut cells, &mut local_bodies, self.kernel);
            timer.stop("downward_pass");
        }

        tracing::info!("solve complete");
        Ok((local_bodies, timer))
    }
}

fn accumulate<T: Float>(cells: &mut crate::cell::Cells<T>, bodies: &mut Bodies<T>, locals: Vec<Vec<T>>, trgs: Vec<[T; 4]>) {
    for (cell, local) in cells.iter_mut().zip(locals) {
        for (l, contribution) in cell.l.iter_mut().zip(local) {
            *l = *l + contribution;
        }
    }
    for (body, trg) in bodies.iter_mut().zip(trgs) {
        for k in 0..4 {
            body.trg[k] = body.trg[k] + trg[k];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::comm::LocalComm;
    use crate::geometry::Vec3;
    use crate::kernel::DirectKernel;

    #[test]
    fn solve_emits_tracing_spans_for_every_step() {
        // Captures each step's span/event names through a test-local
        // subscriber instead of asserting on timer keys, so this exercises
        // the `tracing` instrumentation directly rather than `Timer`
        // (src/logger.rs), which already has its own coverage.
        use std::sync::{Arc, Mutex};
        use tracing_subscriber::layer::SubscriberExt;

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<String>>>);
        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Captured {
            fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, _id: &tracing::span::Id, _ctx: tracing_subscriber::layer::Context<'_, S>) {
                self.0.lock().unwrap().push(attrs.metadata().name().to_string());
            }
        }

        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let bodies: Bodies<f64> = (0..64)
            .map(|i| Body::new(Vec3::new((i % 4) as f64, (i / 4 % 4) as f64, (i / 16) as f64), 1.0, i))
            .collect();
        let cfg = Config::builder().ncrit(8).theta(0.5).build().unwrap();
        let solver = Solver::new(cfg, &DirectKernel);
        let comm = LocalComm;
        tracing::subscriber::with_default(subscriber, || {
            let _ = solver.solve(bodies, &comm);
        });

        let names = captured.0.lock().unwrap();
        for step in ["partition", "build_tree", "upward_pass", "local_traversal", "downward_pass"] {
            assert!(names.iter().any(|n| n == step), "missing span for {step}: {names:?}");
        }
    }

    #[test]
    fn solve_runs_end_to_end_at_p1() {
        let bodies: Bodies<f64> = (0..200)
            .map(|i| Body::new(Vec3::new((i % 8) as f64, (i / 8 % 8) as f64, (i / 64) as f64), 1.0, i))
            .collect();
        let cfg = Config::builder().ncrit(8).theta(0.5).build().unwrap();
        let solver = Solver::new(cfg, &DirectKernel);
        let comm = LocalComm;
        let (out, _timer) = solver.solve(bodies, &comm);
        assert_eq!(out.len(), 200);
        for b in &out {
            assert!(b.trg[0].is_finite());
        }
    }

    #[test]
    fn solve_handles_empty_input() {
        let bodies: Bodies<f64> = Vec::new();
        let cfg = Config::default();
        let solver = Solver::new(cfg, &DirectKernel);
        let comm = LocalComm;
        let (out, _timer) = solver.solve(bodies, &comm);
        assert!(out.is_empty());
    }
}
