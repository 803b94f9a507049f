//! ESP32 WiFi radio.
//!
//! Wraps the ESP-IDF driver without the blocking helper: `connect()` returns
//! as soon as the request is queued, and the outcome is read back on each
//! poll. Station disconnect reasons arrive through a raw event handler.

use super::{classify_disconnect_reason, JoinPoll, LinkError, Radio};
use crate::credentials::Secret;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::{self as sys, esp, EspError};
use log::{debug, info, warn};
use std::ffi::c_void;
use std::sync::atomic::{AtomicU16, Ordering};

/// Last station disconnect reason; zero when none is pending.
static LAST_DISCONNECT_REASON: AtomicU16 = AtomicU16::new(0);

unsafe extern "C" fn on_sta_disconnected(
    _arg: *mut c_void,
    _base: sys::esp_event_base_t,
    _id: i32,
    data: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    let event = &*(data as *const sys::wifi_event_sta_disconnected_t);
    LAST_DISCONNECT_REASON.store(u16::from(event.reason), Ordering::SeqCst);
}

/// ESP-IDF WiFi station.
pub struct EspRadio<'a> {
    wifi: EspWifi<'a>,
    joining: bool,
}

impl<'a> EspRadio<'a> {
    /// Take the modem and register for disconnect events.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, EspError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;

        esp!(unsafe {
            sys::esp_event_handler_register(
                sys::WIFI_EVENT,
                sys::wifi_event_t_WIFI_EVENT_STA_DISCONNECTED as i32,
                Some(on_sta_disconnected),
                std::ptr::null_mut(),
            )
        })?;

        Ok(Self {
            wifi,
            joining: false,
        })
    }

    fn start_join(&mut self, ssid: &Secret, passphrase: &Secret) -> Result<(), LinkError> {
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .expose()
                .try_into()
                .map_err(|_| LinkError::RadioError("SSID rejected by driver".into()))?,
            password: passphrase
                .expose()
                .try_into()
                .map_err(|_| LinkError::RadioError("passphrase rejected by driver".into()))?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        });

        self.wifi.set_configuration(&config).map_err(driver_error)?;
        if !self.wifi.is_started().map_err(driver_error)? {
            self.wifi.start().map_err(driver_error)?;
        }
        self.wifi.connect().map_err(driver_error)
    }
}

fn driver_error(e: EspError) -> LinkError {
    LinkError::RadioError(format!("{}", e))
}

impl<'a> Radio for EspRadio<'a> {
    fn begin_join(&mut self, ssid: &Secret, passphrase: &Secret) -> Result<(), LinkError> {
        LAST_DISCONNECT_REASON.store(0, Ordering::SeqCst);
        self.start_join(ssid, passphrase)?;
        self.joining = true;
        debug!("WiFi join requested");
        Ok(())
    }

    fn poll_join(&mut self) -> JoinPoll {
        if !self.joining {
            return JoinPoll::Failed(LinkError::RadioError("no join in progress".into()));
        }

        let reason = LAST_DISCONNECT_REASON.swap(0, Ordering::SeqCst);
        if reason != 0 {
            self.joining = false;
            debug!("Station disconnected, reason {}", reason);
            return JoinPoll::Failed(classify_disconnect_reason(reason));
        }

        let connected = self.wifi.is_connected().unwrap_or(false);
        let up = self.wifi.is_up().unwrap_or(false);
        if connected && up {
            self.joining = false;
            if let Ok(ip_info) = self.wifi.sta_netif().get_ip_info() {
                info!("WiFi connected, IP: {}", ip_info.ip);
            }
            JoinPoll::Joined
        } else {
            JoinPoll::Pending
        }
    }

    fn abort_join(&mut self) {
        self.joining = false;
        if let Err(e) = self.wifi.disconnect() {
            warn!("Failed to abort WiFi join: {}", e);
        }
    }

    fn is_associated(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn disconnect(&mut self) {
        self.joining = false;
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi disconnect failed: {}", e);
        }
        if let Err(e) = self.wifi.stop() {
            warn!("WiFi stop failed: {}", e);
        }
    }
}
