//! RTU master against a simulated slave on an in-memory serial link

#![allow(clippy::disallowed_methods)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use bridgesrv::fieldbus::{
    run_poll_loop, BankLayout, FieldBusMaster, MasterError, RegisterKind, RequestTimeout,
    WriteData,
};
use bridgesrv::modbus::codec::crc16;
use bridgesrv::modbus::RtuMaster;
use common::{ShutdownListener, ShutdownTrigger};

/// `[slave] + pdu + crc`
fn frame(slave: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = vec![slave];
    out.extend_from_slice(pdu);
    let crc = crc16(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

struct Bench {
    master: Arc<RtuMaster<DuplexStream>>,
    trigger: ShutdownTrigger,
    poll: JoinHandle<()>,
}

impl Bench {
    fn new(response_timeout_ms: u64) -> (Self, DuplexStream) {
        let (near, far) = tokio::io::duplex(1024);
        let master = Arc::new(RtuMaster::new(
            near,
            BankLayout::default(),
            Duration::from_millis(response_timeout_ms),
        ));
        let (trigger, listener) = ShutdownTrigger::new();
        let poll = spawn_poll(master.clone(), listener);
        (
            Self {
                master,
                trigger,
                poll,
            },
            far,
        )
    }

    async fn stop(self) {
        self.trigger.trigger();
        self.poll.await.unwrap();
    }
}

fn spawn_poll(master: Arc<dyn FieldBusMaster>, listener: ShutdownListener) -> JoinHandle<()> {
    tokio::spawn(run_poll_loop(master, Duration::from_millis(5), listener))
}

/// Read one request of `len` bytes and answer with `reply`
fn slave(mut far: DuplexStream, len: usize, reply: Vec<u8>) -> JoinHandle<(Vec<u8>, DuplexStream)> {
    tokio::spawn(async move {
        let mut request = vec![0u8; len];
        far.read_exact(&mut request).await.unwrap();
        far.write_all(&reply).await.unwrap();
        far.flush().await.unwrap();
        (request, far)
    })
}

#[tokio::test]
async fn test_read_holding_registers() {
    let (bench, far) = Bench::new(500);
    let sim = slave(far, 8, frame(1, &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]));

    bench
        .master
        .submit_read(RegisterKind::HoldingRegister, 1, 0, 2, RequestTimeout::Forever)
        .await
        .unwrap();

    let (request, _far) = sim.await.unwrap();
    assert_eq!(request, frame(1, &[0x03, 0x00, 0x00, 0x00, 0x02]));
    assert_eq!(
        bench
            .master
            .banks()
            .read_values(RegisterKind::HoldingRegister, 1, 0, 2)
            .unwrap(),
        vec![10, 20]
    );
    bench.stop().await;
}

#[tokio::test]
async fn test_read_discrete_inputs_unpacks_bits() {
    let (bench, far) = Bench::new(500);
    let sim = slave(far, 8, frame(3, &[0x02, 0x01, 0b0000_0110]));

    bench
        .master
        .submit_read(RegisterKind::DiscreteInput, 3, 4, 3, RequestTimeout::Forever)
        .await
        .unwrap();

    let (request, _far) = sim.await.unwrap();
    assert_eq!(request, frame(3, &[0x02, 0x00, 0x04, 0x00, 0x03]));
    assert_eq!(
        bench
            .master
            .banks()
            .read_values(RegisterKind::DiscreteInput, 3, 4, 3)
            .unwrap(),
        vec![0, 1, 1]
    );
    bench.stop().await;
}

#[tokio::test]
async fn test_write_registers_mirrors_into_banks() {
    let (bench, far) = Bench::new(500);
    let sim = slave(far, 13, frame(1, &[0x10, 0x00, 0x05, 0x00, 0x02]));

    bench
        .master
        .submit_write(
            RegisterKind::HoldingRegister,
            1,
            5,
            2,
            WriteData::Registers(vec![1, 2]),
            RequestTimeout::Forever,
        )
        .await
        .unwrap();

    let (request, _far) = sim.await.unwrap();
    assert_eq!(
        request,
        frame(1, &[0x10, 0x00, 0x05, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02])
    );
    assert_eq!(
        bench
            .master
            .banks()
            .read_values(RegisterKind::HoldingRegister, 1, 5, 2)
            .unwrap(),
        vec![1, 2]
    );
    bench.stop().await;
}

#[tokio::test]
async fn test_write_coils() {
    let (bench, far) = Bench::new(500);
    let sim = slave(far, 10, frame(2, &[0x0F, 0x00, 0x00, 0x00, 0x03]));

    bench
        .master
        .submit_write(
            RegisterKind::Coil,
            2,
            0,
            3,
            WriteData::Coils(vec![0b101]),
            RequestTimeout::Forever,
        )
        .await
        .unwrap();

    let (request, _far) = sim.await.unwrap();
    assert_eq!(request, frame(2, &[0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0b101]));
    assert_eq!(
        bench
            .master
            .banks()
            .read_values(RegisterKind::Coil, 2, 0, 3)
            .unwrap(),
        vec![1, 0, 1]
    );
    bench.stop().await;
}

#[tokio::test]
async fn test_slave_exception() {
    let (bench, far) = Bench::new(500);
    let sim = slave(far, 8, frame(1, &[0x83, 0x02]));

    let err = bench
        .master
        .submit_read(RegisterKind::HoldingRegister, 1, 0, 1, RequestTimeout::Forever)
        .await
        .unwrap_err();

    assert_eq!(err, MasterError::Exception(2));
    sim.await.unwrap();
    bench.stop().await;
}

#[tokio::test]
async fn test_corrupt_crc_is_receive_error() {
    let (bench, far) = Bench::new(500);
    let mut reply = frame(1, &[0x03, 0x02, 0x00, 0x01]);
    let last = reply.len() - 1;
    reply[last] ^= 0xFF;
    let sim = slave(far, 8, reply);

    let err = bench
        .master
        .submit_read(RegisterKind::HoldingRegister, 1, 0, 1, RequestTimeout::Forever)
        .await
        .unwrap_err();

    assert_eq!(err, MasterError::ReceiveData);
    sim.await.unwrap();
    bench.stop().await;
}

#[tokio::test]
async fn test_silent_slave_times_out() {
    let (bench, far) = Bench::new(50);
    let sim = slave(far, 8, Vec::new());

    let err = bench
        .master
        .submit_read(RegisterKind::InputRegister, 1, 0, 1, RequestTimeout::Forever)
        .await
        .unwrap_err();

    assert_eq!(err, MasterError::Timeout);
    sim.await.unwrap();
    bench.stop().await;
}

#[tokio::test]
async fn test_range_checked_before_queueing() {
    let (bench, _far) = Bench::new(500);

    let err = bench
        .master
        .submit_read(RegisterKind::HoldingRegister, 0, 0, 1, RequestTimeout::Forever)
        .await
        .unwrap_err();
    assert_eq!(err, MasterError::NoRegister);

    let err = bench
        .master
        .submit_read(RegisterKind::Coil, 1, 60, 8, RequestTimeout::Forever)
        .await
        .unwrap_err();
    assert_eq!(err, MasterError::NoRegister);
    bench.stop().await;
}

#[tokio::test]
async fn test_single_slot_queue() {
    // No poll loop: requests stay queued
    let (near, _far) = tokio::io::duplex(64);
    let master = Arc::new(RtuMaster::new(
        near,
        BankLayout::default(),
        Duration::from_millis(50),
    ));

    let first = {
        let master = master.clone();
        tokio::spawn(async move {
            master
                .submit_read(
                    RegisterKind::HoldingRegister,
                    1,
                    0,
                    1,
                    RequestTimeout::Bounded(Duration::from_millis(100)),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let busy = master
        .submit_read(RegisterKind::HoldingRegister, 1, 1, 1, RequestTimeout::Forever)
        .await;
    assert_eq!(busy, Err(MasterError::Busy));

    // The expired submission takes its request back out of the queue
    assert_eq!(first.await.unwrap(), Err(MasterError::Timeout));
    let again = master
        .submit_read(
            RegisterKind::HoldingRegister,
            1,
            0,
            1,
            RequestTimeout::Bounded(Duration::from_millis(10)),
        )
        .await;
    assert_eq!(again, Err(MasterError::Timeout));
}
