use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager as BleManager, Peripheral};
use clap::Parser;
use futures::stream::StreamExt;
use tracing::{error, info, warn};

use pulsehr::appsettings::AppSettings;
use pulsehr::btle::{self, BtleplugTransport};
use pulsehr::gatt::HEART_RATE_SERVICE;
use pulsehr::simulated::{self, SimulatedTransport};
use pulsehr::vrcosc_client::VRCOSCClient;
use pulsehr::{logging, HrClient, HrStream};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SIMULATED_PERIOD: Duration = Duration::from_millis(800);

#[derive(Debug, Parser)]
#[command(name = "pulsehr", about = "Stream a BLE heart rate sensor to VRChat OSC")]
struct Args {
    /// Use an in-memory sensor instead of Bluetooth
    #[arg(long)]
    simulate: bool,

    /// OSC target address (overrides settings)
    #[arg(long)]
    osc_address: Option<String>,

    /// OSC target port (overrides settings)
    #[arg(long)]
    osc_port: Option<u16>,

    /// Only connect to a device whose name contains this
    #[arg(long)]
    device: Option<String>,

    /// Log measurements without sending OSC
    #[arg(long)]
    no_osc: bool,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_settings: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut settings = AppSettings::load().unwrap_or_else(|err| {
        warn!(%err, "using default settings");
        AppSettings::default()
    });
    if let Some(address) = args.osc_address.clone() {
        settings.osc_address = address;
    }
    if let Some(port) = args.osc_port {
        settings.osc_port = port;
    }
    if let Some(device) = args.device.clone() {
        settings.device_name = Some(device);
    }
    if args.save_settings {
        settings.save()?;
    }

    let run = async {
        if args.simulate {
            run_simulated(&settings, args.no_osc).await
        } else {
            run_bluetooth(&settings, args.no_osc).await
        }
    };

    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, exiting");
            Ok(())
        }
    }
}

fn osc_client(settings: &AppSettings, no_osc: bool) -> Result<Option<VRCOSCClient>> {
    if no_osc {
        return Ok(None);
    }

    let addr: SocketAddr = format!("{}:{}", settings.osc_address, settings.osc_port)
        .parse()
        .with_context(|| format!("invalid OSC address {}", settings.osc_address))?;
    info!(%addr, "forwarding heart rate over OSC");

    Ok(Some(VRCOSCClient::new(&addr)?))
}

async fn run_simulated(settings: &AppSettings, no_osc: bool) -> Result<()> {
    let transport = Arc::new(SimulatedTransport::new());
    let client = Arc::new(HrClient::new(transport.clone()).await);
    let sensor = tokio::spawn(simulated::run_sensor(transport, client.clone(), SIMULATED_PERIOD));

    let stream = client.observe(true).await;
    let result = forward_measurements(stream, osc_client(settings, no_osc)?).await;
    sensor.abort();
    result
}

async fn run_bluetooth(settings: &AppSettings, no_osc: bool) -> Result<()> {
    let manager = BleManager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no Bluetooth adapter found"))?;
    info!(adapter = %adapter.adapter_info().await?, "using adapter");

    loop {
        if let Err(err) = handle_session(&adapter, settings, no_osc).await {
            error!("{err:#}");
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One connect, stream, disconnect cycle.
async fn handle_session(adapter: &Adapter, settings: &AppSettings, no_osc: bool) -> Result<()> {
    let osc = osc_client(settings, no_osc)?;
    let peripheral = find_heartrate_device(adapter, settings.device_name.as_deref()).await?;
    let transport = Arc::new(BtleplugTransport::new(peripheral.clone()));
    let client = Arc::new(HrClient::new(transport).await);

    let stream = client.observe(true).await;
    let pump = btle::run_event_pump(adapter, &peripheral, client.clone());
    let forward = forward_measurements(stream, osc);
    tokio::pin!(forward);

    let result = tokio::select! {
        pumped = pump => {
            if let Err(err) = pumped {
                warn!(%err, "event pump failed");
                client.on_disconnected();
            }
            (&mut forward).await
        }
        forwarded = &mut forward => forwarded,
    };

    if peripheral.is_connected().await.unwrap_or(false) {
        peripheral.disconnect().await?;
    }
    result
}

async fn find_heartrate_device(adapter: &Adapter, name_filter: Option<&str>) -> Result<Peripheral> {
    let mut events = adapter.events().await?;

    info!("Scanning for devices...");
    adapter
        .start_scan(ScanFilter {
            services: vec![HEART_RATE_SERVICE],
            ..Default::default()
        })
        .await?;

    while let Some(event) = events.next().await {
        let CentralEvent::DeviceDiscovered(id) = event else {
            continue;
        };

        let peripheral = adapter.peripheral(&id).await?;
        let name = peripheral
            .properties()
            .await?
            .and_then(|props| props.local_name)
            .unwrap_or_default();

        if let Some(filter) = name_filter {
            if !name.contains(filter) {
                continue;
            }
        }

        adapter.stop_scan().await?;
        info!(?id, %name, "connecting to heart rate device");
        peripheral.connect().await?;
        peripheral.discover_services().await?;
        return Ok(peripheral);
    }

    Err(anyhow!("adapter event stream ended while scanning"))
}

async fn forward_measurements(mut stream: HrStream, mut osc: Option<VRCOSCClient>) -> Result<()> {
    while let Some(item) = stream.next().await {
        match item {
            Ok(measurement) => {
                info!(
                    heart_rate = measurement.heart_rate,
                    contact = measurement.sensor_contact_detected,
                    rr = ?measurement.rr_intervals,
                    "heart rate"
                );
                if let Some(osc) = osc.as_mut() {
                    if let Err(err) = osc.send_heartrate(&measurement) {
                        warn!(%err, "failed to send OSC bundle");
                    }
                }
            }
            Err(err) => warn!(%err, "heart rate stream ended"),
        }
    }

    if let Some(osc) = osc.as_mut() {
        osc.send_disconnected()?;
    }
    Ok(())
}
