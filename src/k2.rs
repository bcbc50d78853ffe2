//! Periodic task registration against the k2 I/O scheduler.
//!
//! Every operation opens the control device, sends exactly one request and
//! closes the device again before returning, whether or not the driver
//! accepted the command. All registration state lives in the kernel.

use libc::pid_t;
use log::{debug, info, warn};

use crate::device::{DeviceHandle, K2_IOSCHED_DEV};
use crate::error::K2Error;
use crate::ioctl::{Command, IoctlRequest, K2Channel};

pub mod prelude {
    pub use super::{
        K2Client,
        K2Connector,
        DeviceConnector,
        get_version,
        get_active_devices,
        register_task,
        unregister_task,
        unregister_all_tasks,
        get_inflight_latency,
    };
}

/// Source of short-lived channels to the driver.
pub trait K2Connector {
    type Channel: K2Channel;

    fn connect(&self) -> Result<Self::Channel, K2Error>;

    fn release(&self, channel: Self::Channel) -> Result<(), K2Error>;
}

#[derive(Debug)]
#[derive(Clone)]
pub struct DeviceConnector {
    path: String,
}

impl DeviceConnector {
    pub fn new(path: &str) -> Self {
        DeviceConnector { path: path.to_owned() }
    }
}

impl Default for DeviceConnector {
    fn default() -> Self {
        DeviceConnector::new(K2_IOSCHED_DEV)
    }
}

impl K2Connector for DeviceConnector {
    type Channel = DeviceHandle;

    fn connect(&self) -> Result<DeviceHandle, K2Error> {
        DeviceHandle::open(&self.path)
    }

    fn release(&self, channel: DeviceHandle) -> Result<(), K2Error> {
        channel.close()
    }
}

#[derive(Debug)]
#[derive(Clone, Default)]
pub struct K2Client<C = DeviceConnector> {
    connector: C,
}

impl K2Client<DeviceConnector> {
    pub fn with_device(path: &str) -> Self {
        K2Client { connector: DeviceConnector::new(path) }
    }
}

impl<C: K2Connector> K2Client<C> {
    pub fn new(connector: C) -> Self {
        K2Client { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn exchange<F>(&self, command: Command, device: Option<&str>, fill: F) -> Result<IoctlRequest, K2Error>
        where F: FnOnce(&mut IoctlRequest)
    {
        let mut request = IoctlRequest::new(command, device)?;
        fill(&mut request);

        let mut channel = self.connector.connect()?;
        let dispatched = channel.dispatch(&mut request);
        let released = self.connector.release(channel);

        match (dispatched, released) {
            (Err(err), Err(close_err)) => {
                warn!("{close_err}");
                Err(err)
            },
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(close_err)) => Err(close_err),
            (Ok(()), Ok(())) => {
                debug!("ioctl {command} completed");
                Ok(request)
            },
        }
    }

    /// Scheduler build identifier.
    pub fn get_version(&self) -> Result<String, K2Error> {
        self.exchange(Command::GetVersion, None, |_| ())
            .map(|request| request.string_param())
    }

    /// Devices currently managed by the scheduler, as reported by the driver.
    pub fn get_active_devices(&self) -> Result<String, K2Error> {
        self.exchange(Command::GetActiveDevices, None, |_| ())
            .map(|request| request.string_param())
    }

    pub fn register_task(&self, device: &str, pid: pid_t, interval_ns: i64) -> Result<(), K2Error> {
        if interval_ns <= 0 {
            return Err(K2Error::InvalidInterval(interval_ns));
        }

        let request = self.exchange(Command::RegisterPeriodicTask, Some(device), |request| {
            request.task_pid = pid;
            request.interval_ns = interval_ns;
        })?;

        info!("Registered periodic task with pid {} and interval time[ns] {} for {}",
            request.task_pid, request.interval_ns, request.device_name());
        Ok(())
    }

    /// Unregistering a task the driver does not know is not an error.
    pub fn unregister_task(&self, device: &str, pid: pid_t) -> Result<(), K2Error> {
        let request = self.exchange(Command::UnregisterPeriodicTask, Some(device), |request| {
            request.task_pid = pid;
        })?;

        info!("Unregistered periodic task with pid {} for {}", request.task_pid, request.device_name());
        Ok(())
    }

    pub fn unregister_all_tasks(&self, device: &str) -> Result<(), K2Error> {
        let request = self.exchange(Command::UnregisterAllPeriodicTasks, Some(device), |_| ())?;

        info!("Unregistered all periodic tasks for {}", request.device_name());
        Ok(())
    }

    pub fn get_inflight_latency(&self, device: &str) -> Result<u32, K2Error> {
        self.exchange(Command::CurrentInflightLatency, Some(device), |_| ())
            .map(|request| request.u32_param)
    }
}

pub fn get_version() -> Result<String, K2Error> {
    K2Client::with_device(K2_IOSCHED_DEV).get_version()
}

pub fn get_active_devices() -> Result<String, K2Error> {
    K2Client::with_device(K2_IOSCHED_DEV).get_active_devices()
}

pub fn register_task(device: &str, pid: pid_t, interval_ns: i64) -> Result<(), K2Error> {
    K2Client::with_device(K2_IOSCHED_DEV).register_task(device, pid, interval_ns)
}

pub fn unregister_task(device: &str, pid: pid_t) -> Result<(), K2Error> {
    K2Client::with_device(K2_IOSCHED_DEV).unregister_task(device, pid)
}

pub fn unregister_all_tasks(device: &str) -> Result<(), K2Error> {
    K2Client::with_device(K2_IOSCHED_DEV).unregister_all_tasks(device)
}

pub fn get_inflight_latency(device: &str) -> Result<u32, K2Error> {
    K2Client::with_device(K2_IOSCHED_DEV).get_inflight_latency(device)
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    use super::*;

    /// In-memory stand-in for the driver: keeps the (device, pid) registrations
    /// and counts how often the control device is opened and closed.
    #[derive(Default)]
    pub struct FakeDriver {
        pub managed: Vec<String>,
        pub registrations: BTreeSet<(String, pid_t)>,
        pub opens: usize,
        pub closes: usize,
        pub dispatches: Vec<Command>,
        pub open_error: Option<i32>,
        pub reject: Option<(Command, i32)>,
        pub latency: u32,
        /// Called with every command before it is handled.
        pub on_dispatch: Option<Box<dyn FnMut(Command)>>,
    }

    #[derive(Clone, Default)]
    pub struct FakeConnector(pub Rc<RefCell<FakeDriver>>);

    pub struct FakeChannel(Rc<RefCell<FakeDriver>>);

    impl FakeConnector {
        pub fn managing(devices: &[&str]) -> Self {
            let connector = FakeConnector::default();
            connector.0.borrow_mut().managed = devices.iter().map(|d| d.to_string()).collect();
            connector
        }
    }

    impl K2Connector for FakeConnector {
        type Channel = FakeChannel;

        fn connect(&self) -> Result<FakeChannel, K2Error> {
            let mut driver = self.0.borrow_mut();
            if let Some(errno) = driver.open_error {
                return Err(K2Error::device_unavailable(K2_IOSCHED_DEV, std::io::Error::from_raw_os_error(errno)));
            }

            driver.opens += 1;
            Ok(FakeChannel(self.0.clone()))
        }

        fn release(&self, channel: FakeChannel) -> Result<(), K2Error> {
            channel.0.borrow_mut().closes += 1;
            Ok(())
        }
    }

    impl K2Channel for FakeChannel {
        fn dispatch(&mut self, request: &mut IoctlRequest) -> Result<(), K2Error> {
            let mut driver = self.0.borrow_mut();
            let command = request.command();
            driver.dispatches.push(command);
            if let Some(hook) = driver.on_dispatch.as_mut() {
                hook(command);
            }

            if let Some((rejected, errno)) = driver.reject {
                if rejected == command {
                    return Err(K2Error::CommandRejected { command, source: std::io::Error::from_raw_os_error(errno) });
                }
            }

            let device = request.device_name();
            if command.needs_device() && !driver.managed.contains(&device) {
                return Err(K2Error::CommandRejected { command, source: std::io::Error::from_raw_os_error(libc::ENODEV) });
            }

            match command {
                Command::GetVersion => request.set_string_param("k2-fake-1.0")?,
                Command::GetActiveDevices => {
                    let devices = driver.managed.join(" ");
                    request.set_string_param(&devices)?;
                },
                Command::RegisterPeriodicTask => {
                    driver.registrations.insert((device, request.task_pid));
                },
                Command::UnregisterPeriodicTask => {
                    driver.registrations.remove(&(device, request.task_pid));
                },
                Command::UnregisterAllPeriodicTasks => {
                    driver.registrations.retain(|(dev, _)| *dev != device);
                },
                Command::CurrentInflightLatency => request.u32_param = driver.latency,
            }

            Ok(())
        }
    }
}
