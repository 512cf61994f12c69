/*
 *
 *    Device manager for the hosted game. It never creates a device of its own: it adopts the
 *    engine device the interceptor built inside the host's CreateDevice and republishes that
 *    device's lifecycle as created/resetting/reset/disposing.
 *
 * */

use std::sync::{Arc, Mutex, Weak};

use crate::error::ConfigurationError;
use crate::events::{Event, SubscriptionId};
use crate::graphics::device::{DeviceHandle, GraphicsDevice, native_handle};
use crate::graphics::interceptor::{DeviceNotice, GraphicsHooks};
use crate::services::ServiceRegistry;

pub trait DeviceManager: Send + Sync {
    ///Makes sure a device is available. Fails if none has been created yet.
    fn create_device(&self) -> Result<(), ConfigurationError>;
    ///Whether drawing can happen this frame.
    fn begin_draw(&self) -> bool;
    fn end_draw(&self);
}

pub trait GraphicsDeviceService: Send + Sync {
    fn graphics_device(&self) -> Option<Arc<GraphicsDevice>>;
    fn events(&self) -> &DeviceEvents;
}

#[derive(Debug, Default)]
pub struct DeviceEvents {
    pub created: Event<()>,
    pub resetting: Event<()>,
    pub reset: Event<()>,
    pub disposing: Event<()>,
}

pub struct GraphicsDeviceManager {
    hooks: &'static GraphicsHooks,
    services: Weak<ServiceRegistry>,
    device: Mutex<Option<Arc<GraphicsDevice>>>,
    events: Arc<DeviceEvents>,
    //(resetting, reset) subscriptions on the hooks
    forwarding: Mutex<Option<(SubscriptionId, SubscriptionId)>>,
}

impl GraphicsDeviceManager {
    ///Creates the manager and registers it as both the `DeviceManager` and the
    ///`GraphicsDeviceService` of `services`.
    pub fn new(
        services: &Arc<ServiceRegistry>,
        hooks: &'static GraphicsHooks,
    ) -> Result<Arc<Self>, ConfigurationError> {
        if services.contains::<dyn DeviceManager>() {
            return Err(ConfigurationError::AlreadyRegistered(std::any::type_name::<dyn DeviceManager>()));
        }

        let manager = Arc::new(Self {
            hooks,
            services: Arc::downgrade(services),
            device: Mutex::new(None),
            events: Arc::new(DeviceEvents::default()),
            forwarding: Mutex::new(None),
        });
        services.add::<dyn DeviceManager>(manager.clone())?;
        if let Err(e) = services.add::<dyn GraphicsDeviceService>(manager.clone()) {
            services.remove::<dyn DeviceManager>();
            return Err(e);
        }
        Ok(manager)
    }

    ///Drops the device after publishing `disposing`, and unregisters the device service if this
    ///manager is still the registered one.
    pub fn dispose(&self) {
        let device = self.device.lock().unwrap_or_else(|e| e.into_inner()).take();
        if device.is_some() {
            self.events.disposing.publish(&());
        }

        if let Some((resetting, reset)) = self.forwarding.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.hooks.resetting.unsubscribe(resetting);
            self.hooks.reset.unsubscribe(reset);
        }
        drop(device);

        if let Some(services) = self.services.upgrade() {
            let registered = services
                .get::<dyn GraphicsDeviceService>()
                .is_some_and(|service| std::ptr::addr_eq(Arc::as_ptr(&service), self as *const Self));
            if registered {
                services.remove::<dyn GraphicsDeviceService>();
            }
        }
    }

    ///Republishes `source` notices about `device` on one of our own events.
    fn forward(
        &self,
        source: &Event<DeviceNotice>,
        device: Option<DeviceHandle>,
        target: fn(&DeviceEvents) -> &Event<()>,
    ) -> SubscriptionId {
        let events = self.events.clone();
        source.subscribe(move |notice: &DeviceNotice| {
            if Some(notice.device) == device {
                target(&events).publish(&());
            }
        })
    }
}

impl DeviceManager for GraphicsDeviceManager {
    fn create_device(&self) -> Result<(), ConfigurationError> {
        let device = {
            let mut slot = self.device.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Ok(());
            }
            let device = self.hooks.engine_device().ok_or(ConfigurationError::NoGraphicsDevice)?;
            *slot = Some(device.clone());
            device
        };

        let handle = native_handle(&device).ok();
        let resetting = self.forward(&self.hooks.resetting, handle, |events| &events.resetting);
        let reset = self.forward(&self.hooks.reset, handle, |events| &events.reset);
        *self.forwarding.lock().unwrap_or_else(|e| e.into_inner()) = Some((resetting, reset));

        log::info!("Adopted engine device {:?}", handle);
        self.events.created.publish(&());
        Ok(())
    }

    fn begin_draw(&self) -> bool {
        self.device.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn end_draw(&self) {}
}

impl GraphicsDeviceService for GraphicsDeviceManager {
    fn graphics_device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn events(&self) -> &DeviceEvents {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::null_mut;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::{FakeBackend, FakeFactory, create_engine_device, host_parameters};

    fn record(events: &DeviceEvents, log: &Arc<Mutex<Vec<&'static str>>>) {
        for (name, event) in [
            ("created", &events.created),
            ("resetting", &events.resetting),
            ("reset", &events.reset),
            ("disposing", &events.disposing),
        ] {
            let log = log.clone();
            event.subscribe(move |_: &()| log.lock().unwrap().push(name));
        }
    }

    #[test]
    fn registers_under_both_capabilities_once() {
        let (hooks, _) = FakeBackend::install();
        let services = Arc::new(ServiceRegistry::new());

        let manager = GraphicsDeviceManager::new(&services, hooks).unwrap();
        assert!(services.contains::<dyn DeviceManager>());
        assert!(services.contains::<dyn GraphicsDeviceService>());

        let second = GraphicsDeviceManager::new(&services, hooks);
        assert!(matches!(second, Err(ConfigurationError::AlreadyRegistered(_))));

        manager.dispose();
        assert!(!services.contains::<dyn GraphicsDeviceService>());
        assert!(services.contains::<dyn DeviceManager>());
    }

    #[test]
    fn creating_before_interception_is_a_configuration_error() {
        let (hooks, _) = FakeBackend::install();
        let services = Arc::new(ServiceRegistry::new());
        let manager = GraphicsDeviceManager::new(&services, hooks).unwrap();

        assert!(matches!(manager.create_device(), Err(ConfigurationError::NoGraphicsDevice)));
        assert!(!manager.begin_draw());
    }

    #[test]
    fn adopts_the_engine_device_and_forwards_its_lifecycle() {
        let (hooks, _) = FakeBackend::install();
        let factory = FakeFactory::leak_hooked(hooks);
        let handle = create_engine_device(hooks, factory);

        let services = Arc::new(ServiceRegistry::new());
        let manager = GraphicsDeviceManager::new(&services, hooks).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(manager.events(), &log);

        manager.create_device().unwrap();
        manager.create_device().unwrap();
        assert!(manager.begin_draw());
        assert_eq!(
            native_handle(&manager.graphics_device().unwrap()).unwrap(),
            handle
        );

        let mut parameters = host_parameters();
        unsafe { hooks.on_reset(handle.as_ptr(), &mut parameters) };
        //Another device's reset is not ours.
        let other = crate::test_support::FakeDevice::leak();
        unsafe { hooks.on_reset(other.as_ptr(), &mut parameters) };

        manager.dispose();
        assert!(manager.graphics_device().is_none());
        assert_eq!(hooks.resetting.subscriber_count(), 0);
        unsafe { hooks.on_reset(handle.as_ptr(), null_mut()) };

        assert_eq!(*log.lock().unwrap(), vec!["created", "resetting", "reset", "disposing"]);
    }
}
