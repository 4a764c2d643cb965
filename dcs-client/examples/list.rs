use dcs_client::*;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let url = args.next().expect("must pass DCS URL as first argument");
    let username = args.next().expect("must pass username as second argument");
    let password = args.next().expect("must pass password as third argument");

    let client = Client::login(url, &username, &password).await?;

    for idc in client.idcs().await? {
        println!("{:012X} {:?}", idc.mac_address, &idc);
        if idc.modbus_device_count > 0 {
            for device in client.modbus_devices_by_idc(idc.mac_address).await? {
                println!("    {:?}", &device);
            }
        }
    }

    client.logout().await
}
