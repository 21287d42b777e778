//! A test-runner executing steps in lockstep across threads.

use std::{
    panic,
    sync::{Arc, atomic::{AtomicBool, AtomicUsize, Ordering}},
    thread::{self, JoinHandle},
};

/// Lockstep runs a series of steps on multiple threads, each step starting on all threads at once.
///
/// Each thread owns a Local state, passed mutably to each of its steps. Any state shared across threads is captured by
/// the steps themselves.
///
/// If a step panics on any thread, all other threads panic at their next step, and `join` resumes the first panic.
///
/// Constructing a `Lockstep` is done through a `LockstepBuilder`.
pub struct Lockstep<Local> {
    threads: Vec<JoinHandle<Local>>,
}

impl<Local> Lockstep<Local> {
    /// Joins the threads, and returns their Local states, in the order they were registered.
    ///
    /// #   Panics
    ///
    /// If any of the threads panicked.
    pub fn join(mut self) -> Vec<Local> {
        let mut locals = Vec::with_capacity(self.threads.len());
        let (mut failure, mut poisoned) = (None, None);

        for handle in self.threads.drain(..) {
            match handle.join() {
                Ok(local) => locals.push(local),
                Err(payload) if payload.is::<Poisoned>() => { poisoned.get_or_insert(payload); },
                Err(payload) => { failure.get_or_insert(payload); },
            }
        }

        //  Threads abandoning ship merely echo the first failure.
        if let Some(payload) = failure.or(poisoned) {
            panic::resume_unwind(payload);
        }

        locals
    }
}

impl<Local> Drop for Lockstep<Local> {
    fn drop(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// LockstepBuilder, a builder for a `Lockstep` instance.
///
/// #   Example
///
/// ```
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
/// use fenced_test::LockstepBuilder;
///
/// let total = Arc::new(AtomicUsize::new(0));
///
/// let mut builder = LockstepBuilder::new(vec!(1usize, 10));
///
/// builder.add_step(|_| {
///     let total = total.clone();
///     move |local: &mut usize| { total.fetch_add(*local, Ordering::Relaxed); }
/// });
///
/// let locals = builder.launch(4).join();
///
/// assert_eq!(44, total.load(Ordering::Relaxed));
/// assert_eq!(vec!(1, 10), locals);
/// ```
pub struct LockstepBuilder<Local> {
    locals: Vec<Local>,
    steps: Vec<Vec<Box<dyn FnMut(&mut Local) + Send + 'static>>>,
}

impl<Local> LockstepBuilder<Local>
    where
        Local: Send + 'static,
{
    /// Creates a builder, with one thread per Local state.
    ///
    /// #   Panics
    ///
    /// If `locals` is empty.
    pub fn new(locals: Vec<Local>) -> Self {
        assert!(!locals.is_empty(), "Cannot run in lockstep without a single thread");

        let steps = locals.iter().map(|_| Vec::new()).collect();

        Self { locals, steps }
    }

    /// Returns the number of threads.
    pub fn number_threads(&self) -> usize { self.locals.len() }

    /// Adds a step on each thread.
    ///
    /// The step is created by invoking `factory` with the index of each thread.
    pub fn add_step<Factory, Step>(&mut self, mut factory: Factory)
        where
            Factory: FnMut(usize) -> Step,
            Step: FnMut(&mut Local) + Send + 'static,
    {
        for (index, serie) in self.steps.iter_mut().enumerate() {
            serie.push(Box::new(factory(index)));
        }
    }

    /// Launches the threads, each running its serie of steps `iterations` times.
    ///
    /// #   Panics
    ///
    /// If no step was added.
    pub fn launch(self, iterations: usize) -> Lockstep<Local> {
        assert!(!self.steps[0].is_empty(), "Cannot run in lockstep without a single step");

        let rendez_vous = RendezVous::new(self.locals.len());

        let threads = self.locals.into_iter().zip(self.steps)
            .map(|(mut local, mut serie)| {
                let rendez_vous = rendez_vous.clone();

                thread::spawn(move || {
                    let guard = PoisonGuard(Some(rendez_vous.clone()));

                    for _ in 0..iterations {
                        for step in &mut serie {
                            rendez_vous.wait_until_all_ready();

                            step(&mut local);
                        }
                    }

                    guard.dismiss();

                    local
                })
            })
            .collect();

        Lockstep { threads }
    }
}

//
//  Implementation details
//

//  If a single thread panics, then all threads must abandon ship, lest they wait forever.
struct PoisonGuard(Option<RendezVous>);

impl PoisonGuard {
    fn dismiss(mut self) { self.0 = None; }
}

impl Drop for PoisonGuard {
    fn drop(&mut self) {
        if let Some(rendez_vous) = &self.0 {
            rendez_vous.poison();
        }
    }
}

//  A reusable barrier, which can be poisoned.
#[derive(Clone, Debug)]
struct RendezVous(Arc<RendezVousState>);

#[derive(Debug)]
struct RendezVousState {
    count: usize,
    arrived: AtomicUsize,
    generation: AtomicUsize,
    poisoned: AtomicBool,
}

impl RendezVous {
    fn new(count: usize) -> Self {
        let state = RendezVousState {
            count,
            arrived: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
        };

        Self(Arc::new(state))
    }

    fn poison(&self) { self.0.poisoned.store(true, Ordering::Release); }

    fn wait_until_all_ready(&self) {
        let state = &*self.0;

        let generation = state.generation.load(Ordering::Acquire);

        if state.arrived.fetch_add(1, Ordering::AcqRel) + 1 == state.count {
            state.arrived.store(0, Ordering::Relaxed);
            state.generation.fetch_add(1, Ordering::Release);
            return;
        }

        while state.generation.load(Ordering::Acquire) == generation {
            if state.poisoned.load(Ordering::Acquire) {
                abandon_ship();
            }

            thread::yield_now();
        }
    }
}

//  Payload of the panic of a thread abandoning ship.
#[derive(Debug)]
struct Poisoned;

#[cold]
#[inline(never)]
fn abandon_ship() -> ! {
    panic::panic_any(Poisoned);
}

// mod tests
