//! 算子的输入/输出端口.
//!
//! 端口以 `crossbeam` 的无界通道实现. 必选输出端口在接收者已被丢弃时报错;
//! 可选输出端口在没有接收者时静默丢弃数据.

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::{SegError, SegResult};

/// 具名输入端口.
#[derive(Debug)]
pub struct InputPort<T> {
    name: &'static str,
    rx: Receiver<T>,
}

/// 具名必选输出端口.
#[derive(Debug)]
pub struct OutputPort<T> {
    name: &'static str,
    tx: Sender<T>,
}

/// 具名可选输出端口.
#[derive(Debug)]
pub struct OptionalOutputPort<T> {
    name: &'static str,
    tx: Option<Sender<T>>,
}

/// 创建相连的输入端口和发送端.
pub fn input_port<T>(name: &'static str) -> (Sender<T>, InputPort<T>) {
    let (tx, rx) = unbounded();
    (tx, InputPort { name, rx })
}

impl<T> InputPort<T> {
    /// 端口名.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 取出一个已到达的值. 没有值 (或发送端已全部丢弃) 时返回 `None`, 不阻塞.
    #[inline]
    pub fn receive(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// 与 [`Self::receive`] 相同, 但没有值时返回 `SegError::MissingInput`.
    pub fn receive_required(&self) -> SegResult<T> {
        self.receive()
            .ok_or_else(|| SegError::MissingInput(self.name.to_owned()))
    }
}

impl<T> OutputPort<T> {
    /// 创建相连的输出端口和接收端.
    pub fn connect(name: &'static str) -> (Self, Receiver<T>) {
        let (tx, rx) = unbounded();
        (Self { name, tx }, rx)
    }

    /// 端口名.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 发送 `value`. 接收端已被丢弃时返回 `SegError::PortDisconnected`.
    pub fn emit(&self, value: T) -> SegResult<()> {
        self.tx
            .send(value)
            .map_err(|_| SegError::PortDisconnected(self.name.to_owned()))
    }
}

impl<T> OptionalOutputPort<T> {
    /// 创建相连的可选输出端口和接收端.
    pub fn connect(name: &'static str) -> (Self, Receiver<T>) {
        let (tx, rx) = unbounded();
        (Self { name, tx: Some(tx) }, rx)
    }

    /// 创建未连接的可选输出端口.
    #[inline]
    pub fn unconnected(name: &'static str) -> Self {
        Self { name, tx: None }
    }

    /// 端口名.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 是否连接了接收端.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    /// 发送 `value`. 未连接或接收端已被丢弃时什么也不做.
    pub fn emit(&self, value: T) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(value);
        }
    }
}
