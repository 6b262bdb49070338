/// Worker-serialized asynchronous dispatcher
///
/// Every call becomes a job on a FIFO queue drained by one dedicated OS
/// thread that owns the [`Connection`]. Submission never blocks; the
/// caller gets a future that resolves once the worker has run the job.
/// Jobs run one at a time in submission order, so futures resolve in
/// submission order too.
///
/// The worker stops after the last [`Deferred`] clone is dropped and the
/// queue has drained; the connection is dropped on the worker thread.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error};

use super::Dispatcher;
use crate::connection::Connection;
use crate::engine::ProtocolEngine;
use crate::errno;
use crate::error::{ModbusError, ModbusResult};

type Job<E> = Box<dyn FnOnce(&mut Connection<E>) + Send>;

/// Handle on a connection's worker queue
///
/// Fallible jobs hold one permit of `slots` from submission until the
/// worker starts them; property jobs take none and are always accepted.
pub struct Deferred<E: ProtocolEngine> {
    jobs: mpsc::UnboundedSender<Job<E>>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl<E: ProtocolEngine> Deferred<E> {
    /// Fallible jobs currently waiting for the worker
    pub fn queued(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    /// Most fallible jobs that may wait at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn run_worker<E: ProtocolEngine>(mut connection: Connection<E>, mut jobs: mpsc::UnboundedReceiver<Job<E>>) {
    debug!("modbus worker started");
    while let Some(job) = jobs.blocking_recv() {
        if panic::catch_unwind(AssertUnwindSafe(|| job(&mut connection))).is_err() {
            error!("modbus job panicked; its result is reported as canceled");
        }
    }
    debug!("modbus worker stopped");
}

impl<E: ProtocolEngine> Dispatcher for Deferred<E> {
    type Engine = E;
    type Fallible<T: Send + 'static> = Pending<T>;
    type Infallible<T: Send + 'static> = Completion<T>;

    fn attach(connection: Connection<E>, queue_capacity: usize) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let spawned = thread::Builder::new()
            .name("modbus-worker".to_string())
            .spawn(move || run_worker(connection, receiver));
        if let Err(err) = spawned {
            // The receiver went down with the closure; every submission reports ECANCELED.
            error!("failed to spawn modbus worker: {}", err);
        }
        let capacity = queue_capacity.min(Semaphore::MAX_PERMITS);
        Self {
            jobs,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    fn call<T, F>(&self, op: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<E>) -> ModbusResult<T> + Send + 'static,
    {
        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(capacity = self.capacity, "modbus queue full");
                return Pending::ready(Err(ModbusError::from_code(errno::EAGAIN)));
            }
        };

        let (tx, rx) = oneshot::channel();
        let job: Job<E> = Box::new(move |conn| {
            drop(permit);
            let _ = tx.send(op(conn));
        });
        // A rejected job is dropped here together with its permit.
        if self.jobs.send(job).is_err() {
            return Pending::ready(Err(canceled()));
        }
        Pending::queued(rx)
    }

    fn query<T, F>(&self, op: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<E>) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<E> = Box::new(move |conn| {
            let _ = tx.send(op(conn));
        });
        // A closed queue drops the job and its sender; the Completion reports it.
        let _ = self.jobs.send(job);
        Completion { rx }
    }
}

impl<E: ProtocolEngine> Clone for Deferred<E> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            slots: Arc::clone(&self.slots),
            capacity: self.capacity,
        }
    }
}

impl<E: ProtocolEngine> fmt::Debug for Deferred<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("queued", &self.queued())
            .field("capacity", &self.capacity)
            .finish()
    }
}

enum PendingState<T> {
    Queued(oneshot::Receiver<ModbusResult<T>>),
    Ready(Option<ModbusResult<T>>),
}

/// Future of a fallible operation submitted to the worker
///
/// Resolves exactly once, with the operation's result. A job the worker
/// could not finish (queue closed, or the job panicked) resolves with
/// `ECANCELED`; a submission rejected by a full queue resolves
/// immediately with `EAGAIN`.
#[must_use = "futures do nothing unless polled; the job runs regardless"]
pub struct Pending<T> {
    state: PendingState<T>,
}

impl<T> Pending<T> {
    fn queued(rx: oneshot::Receiver<ModbusResult<T>>) -> Self {
        Self {
            state: PendingState::Queued(rx),
        }
    }

    fn ready(result: ModbusResult<T>) -> Self {
        Self {
            state: PendingState::Ready(Some(result)),
        }
    }

    /// Block the current thread until the job has run
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> ModbusResult<T> {
        match self.state {
            PendingState::Queued(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(canceled())),
            PendingState::Ready(result) => result.unwrap_or_else(|| Err(canceled())),
        }
    }
}

fn canceled() -> ModbusError {
    ModbusError::from_code(errno::ECANCELED)
}

// No field is ever pinned structurally.
impl<T> Unpin for Pending<T> {}

impl<T> Future for Pending<T> {
    type Output = ModbusResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Queued(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(canceled()))),
            PendingState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| Err(canceled()))),
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            PendingState::Queued(_) => "queued",
            PendingState::Ready(_) => "ready",
        };
        f.debug_struct("Pending").field("state", &state).finish()
    }
}

/// Future of an operation that cannot fail, such as a property read
///
/// If the worker drops the job without running it (the job panicked, or
/// the worker thread could not be started) the future resolves to
/// `T::default()` and the loss is logged.
#[must_use = "futures do nothing unless polled; the job runs regardless"]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

fn dropped<T: Default>() -> T {
    error!("modbus worker dropped the job without running it");
    T::default()
}

impl<T: Default> Completion<T> {
    /// Block the current thread until the job has run
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> T {
        self.rx.blocking_recv().unwrap_or_else(|_| dropped())
    }
}

impl<T: Default> Future for Completion<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| dropped()))
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SimulatedDevice, SimulatedEngine};
    use crate::AsyncClient;
    use std::time::Duration;

    fn client(device: &SimulatedDevice) -> AsyncClient<SimulatedEngine> {
        AsyncClient::<SimulatedEngine>::with_engine(device.engine())
    }

    #[test]
    fn test_wait_outside_runtime() {
        let device = SimulatedDevice::new();
        let client = client(&device);
        client.connect().wait().unwrap();
        client.write_register(2, 77).wait().unwrap();
        assert_eq!(client.read_register(2).wait().unwrap(), 77);
        assert!(client.is_connected().wait());
    }

    #[test]
    fn test_block_on_with_tokio_test() {
        let device = SimulatedDevice::new();
        let client = client(&device);
        tokio_test::block_on(async {
            client.connect().await.unwrap();
            client.write_bits(0, &[1, 1, 0]).await.unwrap();
            assert_eq!(client.read_bits(0, 3).await.unwrap(), vec![1, 1, 0]);
        });
    }

    #[tokio::test]
    async fn test_queue_full_rejects_with_eagain() {
        let device = SimulatedDevice::new();
        let connection = Connection::with_engine(device.engine());
        let client = AsyncClient::<SimulatedEngine>::with_queue_capacity(connection, 1);
        client.connect().await.unwrap();

        device.delay_next(Duration::from_millis(200));
        let running = client.read_register(0);
        // Let the worker pick up the slow job so the queue is empty again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let waiting = client.read_register(1);
        let rejected = client.read_register(2);

        let err = rejected.await.unwrap_err();
        assert_eq!(err.code(), errno::EAGAIN);
        assert_eq!(err.message(), "Resource temporarily unavailable");
        assert!(running.await.is_ok());
        assert!(waiting.await.is_ok());
        assert_eq!(device.journal().len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let device = SimulatedDevice::new();
        let client = client(&device);
        client.connect().await.unwrap();

        let boom = client
            .dispatcher()
            .call::<(), _>(|_conn| panic!("engine exploded"));
        assert_eq!(boom.await.unwrap_err().code(), errno::ECANCELED);

        client.write_register(1, 5).await.unwrap();
        assert_eq!(client.read_register(1).await.unwrap(), 5);
        assert_eq!(client.dispatcher().queued(), 0);
    }

    #[tokio::test]
    async fn test_panicking_query_resolves_to_default() {
        let device = SimulatedDevice::new();
        let client = client(&device);
        client.connect().await.unwrap();

        let lost: usize = client
            .dispatcher()
            .query(|_conn| -> usize { panic!("property read exploded") })
            .await;
        assert_eq!(lost, 0);
        assert_eq!(client.header_length().await, 7);
        assert!(client.is_connected().await);
    }

    #[test]
    fn test_permits_return_after_jobs_start() {
        let device = SimulatedDevice::new();
        let connection = Connection::with_engine(device.engine());
        let client = AsyncClient::<SimulatedEngine>::with_queue_capacity(connection, 1);
        client.connect().wait().unwrap();

        for value in 0..5 {
            client.write_register(0, value).wait().unwrap();
        }
        assert_eq!(client.dispatcher().queued(), 0);
        assert_eq!(client.dispatcher().capacity(), 1);
        assert_eq!(client.read_register(0).wait().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_clones_share_worker() {
        let device = SimulatedDevice::new();
        let first = client(&device);
        let second = first.clone();
        first.connect().await.unwrap();

        second.write_register(9, 99).await.unwrap();
        assert_eq!(first.read_register(9).await.unwrap(), 99);
        assert_eq!(device.connect_count(), 1);
    }

    #[test]
    fn test_last_clone_drop_closes_session() {
        let device = SimulatedDevice::new();
        {
            let client = client(&device);
            client.connect().wait().unwrap();
            let _ = client.write_register(0, 1);
        }
        for _ in 0..100 {
            if device.close_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(device.close_count(), 1);
        assert_eq!(device.bank().read_holding_registers(0, 1), vec![1]);
    }
}
