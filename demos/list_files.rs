use pscam_lib_rs::cam::CameraSession;

#[tokio::main]
/// This example connects over USB, prints the camera identity and walks the
/// DCIM folder tree, printing every entry.
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut cam = CameraSession::open_usb().await?;

    println!("{}", cam.identify().await?);
    println!("{}", cam.power_status().await?);
    println!("clock: {}", cam.clock().await?);

    let folders = cam.list_dir("DCIM").await?;
    for folder in folders.iter().filter(|e| e.is_directory()) {
        println!("{}:", folder.name);
        for entry in cam.list_dir(&format!("DCIM\\{}", folder.name)).await? {
            println!("  {entry}");
        }
    }

    cam.close().await?;
    Ok(())
}
