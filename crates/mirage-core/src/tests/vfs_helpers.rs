use std::io::{Read, Seek, SeekFrom, Write};

use crate::vfs::{
    FsDir, MemDir, MemFile, OpenMode, VDir, file_size, open_increment_file, open_sibling,
};

#[test]
fn mem_file_round_trips_and_reports_size() {
    let mut file = MemFile::from_vec(b"cartridge".to_vec());
    assert_eq!(file_size(&mut file).unwrap(), 9);

    file.seek(SeekFrom::End(0)).unwrap();
    file.write_all(b"!").unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "cartridge!");
}

#[test]
fn mem_dir_shares_writes_between_handles() {
    let dir = MemDir::new();
    dir.insert("save.sav", Vec::new());
    let mut writer = dir.clone().open_file("save.sav", OpenMode::ReadWrite).unwrap();
    writer.write_all(b"progress").unwrap();
    assert_eq!(dir.contents("save.sav").unwrap(), b"progress");
}

#[test]
fn open_sibling_derives_name_from_rom_stem() {
    let mut dir = MemDir::new();
    let mut save = open_sibling(
        &mut dir,
        Some("roms/adventure.gba"),
        "sram",
        ".sav",
        OpenMode::ReadWrite,
    )
    .unwrap();
    save.write_all(b"\0").unwrap();
    assert_eq!(dir.names(), ["adventure.sav"]);
}

#[test]
fn open_sibling_falls_back_without_a_source_name() {
    let mut dir = MemDir::new();
    open_sibling(&mut dir, None, "sram", ".sav", OpenMode::ReadWrite).unwrap();
    assert_eq!(dir.names(), ["sram.sav"]);
}

#[test]
fn open_increment_file_skips_taken_indices() {
    let mut dir = MemDir::new();
    dir.insert("adventure-1.png", Vec::new());
    dir.insert("adventure-3.png", Vec::new());
    open_increment_file(&mut dir, Some("adventure.gba"), "screenshot", "-", ".png").unwrap();
    assert!(dir.names().contains(&"adventure-4.png".to_string()));
}

#[test]
fn open_increment_file_starts_at_one() {
    let mut dir = MemDir::new();
    open_increment_file(&mut dir, None, "screenshot", "-", ".png").unwrap();
    assert_eq!(dir.names(), ["screenshot-1.png"]);
}

#[test]
fn fs_dir_lists_files_sorted_and_opens_them() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("b.gba"), b"rom b").unwrap();
    std::fs::write(tmp.path().join("a.gba"), b"rom a").unwrap();

    let mut dir = FsDir::open(tmp.path()).unwrap();
    let names: Vec<String> = std::iter::from_fn(|| dir.list_next().map(|e| e.name)).collect();
    assert_eq!(names, ["a.gba", "b.gba"]);

    let mut file = dir.open_file("a.gba", OpenMode::Read).unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "rom a");

    dir.open_file("fresh.sav", OpenMode::ReadWrite).unwrap();
    dir.rewind();
    let rescanned: Vec<String> = std::iter::from_fn(|| dir.list_next().map(|e| e.name)).collect();
    assert_eq!(rescanned, ["a.gba", "b.gba", "fresh.sav"]);
}
