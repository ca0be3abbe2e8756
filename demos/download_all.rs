use std::{fs::File, io::Write};

use pscam_lib_rs::cam::CameraSession;
use pscam_lib_rs::transfer::TransferKind;

#[tokio::main]
/// This example downloads every image under DCIM into the current local
/// directory, with a progress line per file.
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut cam = CameraSession::open_usb().await?;

    cam.set_progress(Some(Box::new(|done, total| {
        print!("\r{done}/{total} bytes");
        let _ = std::io::stdout().flush();
    })));

    let folders = cam.list_dir("DCIM").await?;
    for folder in folders.iter().filter(|e| e.is_directory()) {
        cam.change_dir(&format!("DCIM\\{}", folder.name)).await?;
        let files = cam.list_dir("").await?;
        for file in files.iter().filter(|e| !e.is_directory()) {
            println!("downloading {}", file.name);
            let data = cam.download(&file.name, TransferKind::Image).await?;
            println!();
            File::create(&file.name)?.write_all(&data)?;
        }
        cam.change_dir("..").await?;
        cam.change_dir("..").await?;
    }

    cam.close().await?;
    Ok(())
}
